pub mod broadcast;
pub mod controls;
pub mod dummy;
pub mod simulated;
pub mod temperatures;
