pub mod plans;
pub mod promo;
pub mod serve;
pub mod show;
pub mod sync;
