pub mod bus;
pub mod reconstructor;
pub mod storage_worker;
pub mod types;

pub use bus::{BusSource, MemoryBusSource, TcpBusSource};
pub use reconstructor::{FlowReconstructor, FlushRequest};
pub use storage_worker::{FlushBatch, StorageWorkerPool};
pub use types::{BusEvent, Direction, HttpFlow, HttpMessage, PacketEvent};
