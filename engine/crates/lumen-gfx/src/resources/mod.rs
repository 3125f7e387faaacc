pub mod deferred;
pub mod descriptor_pool;
pub mod desc;
pub mod handles;
pub mod headless;
pub mod manager;
pub mod resource_data;
pub mod sampler;
pub mod usage;
pub mod vulkan_manager;
