pub mod framing;
pub mod hub;
pub mod scan;
pub mod session;
pub(crate) mod task;

pub use framing::MuxChannel;
pub use hub::{ConnectionError, HubConnection};
pub use scan::{DeviceDescriptor, ScanError};
pub use session::{CommandError, ImuConnection, SamplingError};
