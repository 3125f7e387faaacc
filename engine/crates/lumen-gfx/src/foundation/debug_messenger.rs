use std::ffi::CStr;

use ash::vk;

use crate::GfxResult;

/// validation layer 消息的接收者，消息统一转发到 `log`
pub struct GfxDebugMsger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl GfxDebugMsger {
    const MSG_TYPE: vk::DebugUtilsMessageTypeFlagsEXT = vk::DebugUtilsMessageTypeFlagsEXT::from_raw(
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL.as_raw()
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION.as_raw()
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE.as_raw(),
    );
    const MSG_SEVERITY: vk::DebugUtilsMessageSeverityFlagsEXT = vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING.as_raw() | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR.as_raw(),
    );

    pub fn new(vk_entry: &ash::Entry, instance: &ash::Instance) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(vk_entry, instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&Self::debug_utils_messenger_ci(), None)? };

        Ok(Self { loader, messenger })
    }

    pub fn destroy(&self) {
        log::info!("destroying debug messenger");
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }

    /// 创建 instance 和 messenger 时共用的参数
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(Self::MSG_SEVERITY)
            .message_type(Self::MSG_TYPE)
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

/// 把 validation layer 的 json 消息拆成 (其余字段, MainMessage)
///
/// MainMessage 里面有换行符，需要单独输出。不是 json 时原样返回
fn split_main_message(msg: &str) -> (String, String) {
    let Ok(mut value) = serde_json::from_str::<serde_json::Value>(msg) else {
        return (msg.to_string(), String::new());
    };
    let Some(obj) = value.as_object_mut() else {
        return (msg.to_string(), String::new());
    };

    let main_msg = obj.remove("MainMessage").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
    let rest = serde_json::to_string_pretty(obj).unwrap_or_else(|_| msg.to_string());
    (rest, main_msg)
}

/// debug messenger 的回调函数
///
/// # Safety
/// 由 vulkan loader 调用，`p_callback_data` 在回调期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let (rest, main_msg) = split_main_message(msg.as_ref());
    let format_msg = format!("[{:?}]\n{}\n{}\n", message_type, rest, main_msg);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

/// 可以设置 debug name 的 vulkan 对象
pub trait DebugType {
    fn debug_type_name() -> &'static str;
    fn vk_handle(&self) -> impl vk::Handle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_message_is_split_out() {
        let (rest, main) = split_main_message(r#"{"MainMessage":"line1\nline2","MessageID":42}"#);
        assert_eq!(main, "line1\nline2");
        assert!(rest.contains("MessageID"));
        assert!(!rest.contains("MainMessage"));
    }

    #[test]
    fn plain_text_passes_through() {
        let (rest, main) = split_main_message("not json at all");
        assert_eq!(rest, "not json at all");
        assert!(main.is_empty());
    }
}
