pub mod flows;
pub mod network;
pub mod records;
pub mod region;

pub use flows::*;
pub use network::*;
pub use records::*;
pub use region::*;
