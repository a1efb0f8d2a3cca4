use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Directive used when `RUST_LOG` is unset.
///
/// Router internals stay one level quieter than the server so `-v` shows
/// connections and targets without per-message noise.
pub fn default_directive(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn",
		1 => "warn,dtmux=info,dt_runtime=info",
		2 => "info,dtmux=debug,dt_runtime=debug",
		_ => "debug,dtmux=trace,dt_runtime=trace",
	}
}

pub fn init_logging(verbosity: u8) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr.with_max_level(tracing::Level::TRACE))
		.with_target(verbosity > 1)
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_every_level_parses() {
		for verbosity in 0..=4 {
			let directive = default_directive(verbosity);
			assert!(EnvFilter::try_new(directive).is_ok(), "bad directive {directive}");
		}
	}

	#[test]
	fn test_quiet_by_default() {
		assert_eq!(default_directive(0), "warn");
		assert!(default_directive(1).contains("dtmux=info"));
	}
}
