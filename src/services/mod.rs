pub mod master_service;
pub mod slave_service;

pub use master_service::{EventRecorder, MasterEvent, MasterService, Outcome};
pub use slave_service::SlaveService;
