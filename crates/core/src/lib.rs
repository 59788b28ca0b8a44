#![deny(warnings)]

pub mod config;
pub mod emotion;
pub mod fusion;
pub mod music;
pub mod recommend;
pub mod session;
