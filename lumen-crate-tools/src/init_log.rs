use std::io::Write;

use anstyle::{AnsiColor, Color, RgbColor, Style};

/// 日志中 `[file:line]` 部分使用的颜色
const LOCATION_COLOR: RgbColor = RgbColor(110, 110, 110);
/// 日志正文使用的颜色
const MESSAGE_COLOR: RgbColor = RgbColor(75, 75, 75);

fn level_color(level: log::Level) -> Option<Color> {
    match level {
        log::Level::Error => Some(Color::Ansi(AnsiColor::Red)),
        log::Level::Warn => Some(Color::Ansi(AnsiColor::Yellow)),
        log::Level::Info => Some(Color::Ansi(AnsiColor::Green)),
        log::Level::Debug => Some(Color::Ansi(AnsiColor::Cyan)),
        log::Level::Trace => None,
    }
}

/// 初始化全局 logger
///
/// 默认等级为 Info，可以通过 `RUST_LOG` 覆盖，例如 `RUST_LOG=lumen_gfx=debug`。
/// 重复调用是安全的，只有第一次生效。
pub fn init_log() {
    let _ = env_logger::Builder::new()
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level()).fg_color(level_color(record.level()));
            let location_style = Style::new().fg_color(Some(Color::Rgb(LOCATION_COLOR)));
            let message_style = Style::new().fg_color(Some(Color::Rgb(MESSAGE_COLOR)));

            let line = record.line().unwrap_or(!0);
            // windows 和 unix 的路径分隔符都需要处理
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {location_style}[{file}:{line}]{location_style:#} \
                 {message_style}{}{message_style:#}",
                record.args()
            )
        })
        .try_init();
}
