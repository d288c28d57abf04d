// src/models/mod.rs

pub mod attempt;
pub mod job;
pub mod question;
pub mod quiz;
