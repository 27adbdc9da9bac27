pub mod hnl;
