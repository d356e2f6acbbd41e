//! MPIR controller client: launches and attaches jobs under MPIR control
//! via the out-of-process frontend daemon.

mod controller;
mod proctable;

pub use controller::MpirController;
pub use proctable::{DaemonProctableReader, MockProctableReader, ProctableReader};

pub use cti_fe_daemon::{MpirHandle, ProctableEntry};
