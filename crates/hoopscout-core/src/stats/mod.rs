// League normalization: raw stat lines, cohort aggregates, z-score vectors.

pub mod category;
pub mod league;
pub mod record;
pub mod scorer;
