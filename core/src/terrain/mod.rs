pub mod mask;

pub use mask::{TerrainMask, TerrainType, TerrainUse};
