pub mod flux;
pub mod postprocess;
pub mod weights;
