mod correlator;

pub use correlator::{PeerOutbound, RelayCore, RelayTimings};
