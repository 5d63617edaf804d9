pub mod cdp;
pub mod host;
pub mod session;

pub use cdp::CdpClient;
pub use host::CdpTabHost;
pub use session::{BrowserEngine, BrowserSession};
