pub mod cadence;
pub mod inject;
pub mod llm;
pub mod normalize;
pub mod session;
