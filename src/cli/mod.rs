//! Terminal presentation host for the module router.

pub mod dashboard;
pub mod modules;
pub mod prefetch;
pub mod setup;
pub mod show;
pub mod ui;
