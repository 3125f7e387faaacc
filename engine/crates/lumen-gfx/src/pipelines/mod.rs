pub mod graphics_state;
pub mod shader;
