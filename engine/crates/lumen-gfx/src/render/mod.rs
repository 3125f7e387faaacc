pub mod cmd;
pub mod device;
pub(crate) mod frame_flow;
pub mod frame_ring;
pub mod frame_slot;
pub mod headless_device;
pub mod render_device;
