// ==============================================================================
// lib.rs - PRS Engine Library
// ==============================================================================
// Description: Library interface for polygenic risk score computation
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-17
// Version: 2.0.0
// ==============================================================================

pub mod parsers;
pub mod genotype_converter;
pub mod models;
pub mod config;
pub mod loader;
pub mod weight_scale;
pub mod matcher;
pub mod reference_stats;
pub mod evaluator;
pub mod aggregator;
pub mod progress;
pub mod processor;
pub mod batch;
pub mod output;
