use flexi_logger::{DeferredNow, style};
use log::{Level, Record};

/// `message` for info, `level: message` otherwise, colored by level.
pub fn cli_format(
    w: &mut dyn std::io::Write,
    _now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let level = record.level();
    match level {
        Level::Info => write!(w, "{}", record.args()),
        _ => write!(
            w,
            "{}",
            style(level).paint(format!(
                "{}: {}",
                level.as_str().to_lowercase(),
                record.args()
            ))
        ),
    }
}
