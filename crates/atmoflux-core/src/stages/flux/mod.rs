pub mod honda;
pub mod mceq_barr;
