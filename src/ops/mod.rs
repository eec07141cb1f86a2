pub mod adjustments;
pub mod denoise;
pub mod filters;
pub mod selection;
