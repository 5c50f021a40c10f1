use std::fs;

use camino::Utf8Path;

use crate::config::{DEFAULT_MAX_GRIDS, DEFAULT_RENAME_SUFFIX};
use crate::domain::{ExtractedFile, ValidationResult};
use crate::error::RoundTripError;
use crate::grid::{Codec, GridLibrary};

#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    /// Files with more grids than this are rejected.
    pub max_grids: usize,
    pub rename_suffix: String,
    pub codec: Codec,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            max_grids: DEFAULT_MAX_GRIDS,
            rename_suffix: DEFAULT_RENAME_SUFFIX.to_string(),
            codec: Codec::default(),
        }
    }
}

pub struct RoundTripValidator<'a, G: GridLibrary + ?Sized> {
    library: &'a G,
    settings: &'a ValidatorSettings,
}

impl<'a, G: GridLibrary + ?Sized> RoundTripValidator<'a, G> {
    pub fn new(library: &'a G, settings: &'a ValidatorSettings) -> Self {
        Self { library, settings }
    }

    /// Reads `file.source_path`, writes its first grid renamed to
    /// `file.output_path` and reads the result back.
    pub fn validate(&self, file: &ExtractedFile) -> Result<ValidationResult, RoundTripError> {
        let source = file.source_path.as_path();
        let output = file.output_path.as_path();

        let original_size = file_size(source)?;
        if original_size == 0 {
            return Err(RoundTripError::EmptySource(source.to_string()));
        }

        let grids = self.library.read_all(source)?;
        if grids.len() > self.settings.max_grids {
            return Err(RoundTripError::TooManyGrids {
                path: source.to_string(),
                count: grids.len(),
            });
        }
        let mut grid = grids
            .into_iter()
            .next()
            .ok_or_else(|| RoundTripError::EmptyGridFile(source.to_string()))?;

        let renamed = format!("{}{}", grid.name(), self.settings.rename_suffix);
        grid.rename(renamed);
        self.library.write(output, &grid, self.settings.codec)?;

        let reread = self.library.read_all(output)?;
        if reread.is_empty() {
            return Err(RoundTripError::EmptyGridFile(output.to_string()));
        }

        let transformed_size = file_size(output)?;
        if transformed_size == 0 {
            return Err(RoundTripError::EmptyOutput(output.to_string()));
        }

        Ok(ValidationResult {
            original_size,
            transformed_size,
            ratio: original_size as f64 / transformed_size as f64,
            mismatched: false,
        })
    }
}

fn file_size(path: &Utf8Path) -> Result<u64, RoundTripError> {
    fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|err| RoundTripError::Filesystem(format!("stat {path}: {err}")))
}
