pub mod ports;
pub mod subjects;

pub use ports::PortAllocator;
pub use subjects::{test_timeouts, SubjectFixtures};
