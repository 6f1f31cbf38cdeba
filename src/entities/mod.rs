pub mod spk;
pub mod spk_sequence;

pub use spk::SpkStatus;
