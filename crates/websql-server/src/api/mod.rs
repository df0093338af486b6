//! HTTP handlers

pub mod rest;
pub mod sys;
pub mod ws;
