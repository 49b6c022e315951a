pub mod block;
pub mod config;
pub mod dist;
pub mod error;
pub mod indel;
pub mod msa;
pub mod phylo;
pub mod rates;
pub mod simulator;
pub mod subst;
