// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Engine configuration, read from a YAML file and `VOXMIX_*` environment variables.
use std::path::Path;

use ::config::{Config, Environment, File, FileFormat};

mod error;
mod mixer;

pub use error::ConfigError;
pub use mixer::Mixer;

/// Prefix of the environment variables that override file settings.
pub const ENV_PREFIX: &str = "VOXMIX";

/// Loads the mixer configuration. Settings from `path`, if given, are overridden by
/// environment variables such as `VOXMIX_VOICES=16`.
pub fn load(path: Option<&Path>) -> Result<Mixer, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
    }
    let mixer: Mixer = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()?
        .try_deserialize()?;
    mixer.validate()?;
    Ok(mixer)
}
