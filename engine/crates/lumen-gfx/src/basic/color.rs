/// debug label 使用的颜色
pub struct LabelColor;
impl LabelColor {
    const RED: glam::Vec4 = glam::vec4(1.0, 0.0, 0.0, 1.0);
    const GREEN: glam::Vec4 = glam::vec4(0.0, 1.0, 0.0, 1.0);
    const BLUE: glam::Vec4 = glam::vec4(0.0, 0.0, 1.0, 1.0);
    const YELLOW: glam::Vec4 = glam::vec4(1.0, 1.0, 0.0, 1.0);
    const MAGENTA: glam::Vec4 = glam::vec4(1.0, 0.0, 1.0, 1.0);

    /// 一帧的主命令
    pub const COLOR_FRAME: glam::Vec4 = Self::BLUE;
    /// 一次性提交的命令，例如上传和 mipmap 生成
    pub const COLOR_ONE_TIME: glam::Vec4 = Self::YELLOW;
    /// 用户录制的普通命令
    pub const COLOR_CMD: glam::Vec4 = Self::GREEN;
    /// swapchain 相关
    pub const COLOR_PRESENT: glam::Vec4 = Self::MAGENTA;
    /// 出错时插入的 label
    pub const COLOR_ERROR: glam::Vec4 = Self::RED;
}
