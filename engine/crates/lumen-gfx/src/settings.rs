use std::time::Duration;

use ash::vk;

/// 同时在 GPU 上执行的帧数量
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// GFX 层的默认配置
pub struct DefaultGfxSettings;
impl DefaultGfxSettings {
    pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        // shader 输出会被自动改变： liner -> sRGB
        format: vk::Format::B8G8R8A8_SRGB,
        // 通知 OS，将数值按照 sRGB 空间进行处理和显示
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    pub const DEPTH_FORMAT_CANDIDATES: &'static [vk::Format] = &[
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D16_UNORM_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    /// 一次性命令等待 fence 的最长时间
    pub const ONE_TIME_TIMEOUT: Duration = Duration::from_secs(5);
}

/// 创建 GfxCore 和 Device 时使用的配置
#[derive(Clone, Debug)]
pub struct GfxSettings {
    pub app_name: String,
    pub engine_name: String,

    /// true 时使用 FIFO，false 时尝试 IMMEDIATE
    pub vsync: bool,
    pub surface_format: vk::SurfaceFormatKHR,
    pub depth_format_candidates: Vec<vk::Format>,

    /// 全局 descriptor pool 能分配的 set 数量，由长期存在的 bind group 使用
    pub max_bind_groups: u32,
    /// 每一帧的 descriptor pool 能分配的 set 数量，每帧开始时重置
    pub max_transient_bind_groups: u32,
    /// 每种 descriptor 类型在 pool 中的数量
    pub descriptors_per_type: u32,

    pub one_time_timeout: Duration,
}

impl Default for GfxSettings {
    fn default() -> Self {
        Self {
            app_name: "lumen".to_string(),
            engine_name: "lumen-engine".to_string(),
            vsync: true,
            surface_format: DefaultGfxSettings::DEFAULT_SURFACE_FORMAT,
            depth_format_candidates: DefaultGfxSettings::DEPTH_FORMAT_CANDIDATES.to_vec(),
            max_bind_groups: 1024,
            max_transient_bind_groups: 256,
            descriptors_per_type: 1024,
            one_time_timeout: DefaultGfxSettings::ONE_TIME_TIMEOUT,
        }
    }
}

impl GfxSettings {
    pub const ENV_VSYNC: &'static str = "LUMEN_VSYNC";
    pub const ENV_APP_NAME: &'static str = "LUMEN_APP_NAME";

    /// 在默认配置的基础上，读取环境变量 `LUMEN_VSYNC` 和 `LUMEN_APP_NAME`
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// 使用 `lookup` 提供的键值覆盖配置，无法解析的值会被忽略
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(Self::ENV_VSYNC) {
            match parse_bool(&value) {
                Some(vsync) => self.vsync = vsync,
                None => log::warn!("ignore {}={:?}: expected on/off", Self::ENV_VSYNC, value),
            }
        }
        if let Some(app_name) = lookup(Self::ENV_APP_NAME).filter(|name| !name.trim().is_empty()) {
            self.app_name = app_name;
        }
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_use_vsync() {
        let settings = GfxSettings::default();
        assert!(settings.vsync);
        assert_eq!(settings.one_time_timeout, Duration::from_secs(5));
        assert_eq!(settings.depth_format_candidates[0], vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn overrides_apply() {
        let settings =
            GfxSettings::default().with_overrides(lookup_from(&[("LUMEN_VSYNC", "off"), ("LUMEN_APP_NAME", "demo")]));
        assert!(!settings.vsync);
        assert_eq!(settings.app_name, "demo");
    }

    #[test]
    fn bad_values_are_ignored() {
        let settings =
            GfxSettings::default().with_overrides(lookup_from(&[("LUMEN_VSYNC", "maybe"), ("LUMEN_APP_NAME", "  ")]));
        assert!(settings.vsync);
        assert_eq!(settings.app_name, "lumen");
    }
}
