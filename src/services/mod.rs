pub mod spk_guard;
pub mod spk_numbering;
pub mod spks;
