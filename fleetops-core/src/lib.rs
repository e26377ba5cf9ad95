//! Fleetops Core
//!
//! Core types and the variable engine for the fleetops orchestrator.
//!
//! This crate contains:
//! - Domain types: stored objects (Task, TaskRun, Pipeline, PipelineRun, Host, Cluster)
//! - Render: `${...}` placeholder resolution and logic expressions
//! - DTOs: run requests accepted by the controller

pub mod domain;
pub mod dto;
pub mod render;
