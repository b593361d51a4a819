//! Request handlers for the Repository and Registry endpoints.

pub mod common;
pub mod concept_descriptions;
pub mod elements;
pub mod health;
pub mod registry;
pub mod shells;
pub mod submodels;
