// error and configuration
pub mod error;
pub mod config;

// data module
pub mod data {
    pub mod spectrum;
    pub mod gaussian;
}

// algorithm module
pub mod algorithm {
    pub mod utility;
    pub mod baseline;
    pub mod normalization;
    pub mod peaks;
    pub mod fitting;
    pub mod boundary;
    pub mod area;
    pub mod deconvolution;
}

// synthetic test spectra
pub mod synthetic;

// end-to-end processing
pub mod pipeline;
