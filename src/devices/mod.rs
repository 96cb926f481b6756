pub mod register_map;

pub use register_map::RegisterMap;
