use std::borrow::Cow;
use std::sync::Arc;

/// Backend identifier - mostly static constants
pub type BackendId = Cow<'static, str>;

/// Target symbol discovered at runtime (e.g. "BTC-USD")
pub type Symbol = Arc<str>;
