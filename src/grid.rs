use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RoundTripError;

/// Disables delayed loading in the OpenVDB library so reads decompress every leaf.
pub const DISABLE_DELAYED_LOAD_ENV: &str = "OPENVDB_DISABLE_DELAYED_LOAD";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Blosc,
    Zip,
    None,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Blosc => write!(f, "blosc"),
            Codec::Zip => write!(f, "zip"),
            Codec::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridMetadata {
    pub name: String,
    pub value_type: String,
}

impl GridMetadata {
    /// `<value type>@<name>`, the form the comparison tool addresses grids by.
    pub fn fingerprint(&self) -> String {
        format!("{}@{}", self.value_type, self.name)
    }
}

/// A grid read from a file. The voxel data stays with the library; `origin`
/// and `index` identify where it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    pub metadata: GridMetadata,
    pub origin: Utf8PathBuf,
    pub index: usize,
}

impl Grid {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.metadata.name = name.into();
    }
}

pub trait GridLibrary: Send + Sync {
    /// Reads every grid in `path`, fully materialized.
    fn read_all(&self, path: &Utf8Path) -> Result<Vec<Grid>, RoundTripError>;

    /// Reads grid descriptors only.
    fn read_metadata(&self, path: &Utf8Path) -> Result<Vec<GridMetadata>, RoundTripError>;

    /// Writes `grid` under its current name to `path`, compressed with `codec`.
    fn write(&self, path: &Utf8Path, grid: &Grid, codec: Codec) -> Result<(), RoundTripError>;
}

/// Writes grid `index` of `source` alone, renamed, to `destination`:
/// `python -c <script> <source> <index> <name> <destination>`.
const WRITE_GRID_SCRIPT: &str = r#"import sys
import pyopenvdb as vdb
source, index, name, destination = sys.argv[1], int(sys.argv[2]), sys.argv[3], sys.argv[4]
grids, _ = vdb.readAll(source)
grid = grids[index]
grid.name = name
vdb.write(destination, grids=[grid])
"#;

/// Grid library backed by the OpenVDB tooling: `vdb_print` for listings and
/// the pyopenvdb bindings for writing single renamed grids.
#[derive(Debug, Clone)]
pub struct VdbCliLibrary {
    print: PathBuf,
    python: PathBuf,
}

impl VdbCliLibrary {
    pub fn new(print: impl Into<PathBuf>, python: impl Into<PathBuf>) -> Self {
        Self {
            print: print.into(),
            python: python.into(),
        }
    }

    fn run(&self, program: &Path, args: &[String], eager: bool) -> Result<String, RoundTripError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if eager {
            cmd.env(DISABLE_DELAYED_LOAD_ENV, "1");
        }
        let output = cmd.output().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RoundTripError::MissingTool(program.display().to_string())
            } else {
                RoundTripError::GridTool(err.to_string())
            }
        })?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", program.display())
        } else {
            stderr
        };
        Err(RoundTripError::GridTool(message))
    }

    fn listing(&self, path: &Utf8Path, eager: bool) -> Result<Vec<GridMetadata>, RoundTripError> {
        let stdout = self.run(&self.print, &[path.to_string()], eager)?;
        Ok(parse_listing(&stdout))
    }
}

impl GridLibrary for VdbCliLibrary {
    fn read_all(&self, path: &Utf8Path) -> Result<Vec<Grid>, RoundTripError> {
        let grids = self
            .listing(path, true)?
            .into_iter()
            .enumerate()
            .map(|(index, metadata)| Grid {
                metadata,
                origin: path.to_path_buf(),
                index,
            })
            .collect();
        Ok(grids)
    }

    fn read_metadata(&self, path: &Utf8Path) -> Result<Vec<GridMetadata>, RoundTripError> {
        self.listing(path, false)
    }

    /// pyopenvdb has no compression switch and always writes the library
    /// default, blosc. Other codecs are refused.
    fn write(&self, path: &Utf8Path, grid: &Grid, codec: Codec) -> Result<(), RoundTripError> {
        if codec != Codec::Blosc {
            return Err(RoundTripError::GridTool(format!(
                "codec {codec} cannot be selected through pyopenvdb"
            )));
        }
        let args = vec![
            "-c".to_string(),
            WRITE_GRID_SCRIPT.to_string(),
            grid.origin.to_string(),
            grid.index.to_string(),
            grid.name().to_string(),
            path.to_string(),
        ];
        tracing::debug!(grid = grid.name(), index = grid.index, %path, "writing grid");
        self.run(&self.python, &args, true)?;

        let written = self.listing(path, false)?;
        match written.as_slice() {
            [only] if only.name == grid.name() => Ok(()),
            _ => {
                let found = written
                    .iter()
                    .map(GridMetadata::fingerprint)
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(RoundTripError::GridTool(format!(
                    "\"{path}\" should hold only grid \"{}\", found [{found}]",
                    grid.name()
                )))
            }
        }
    }
}

fn listing_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(r"^\s*(?P<name>\S+)\s+(?P<type>[A-Za-z_][\w:<>]*)\s+\(").expect("valid regex")
    })
}

/// Parses the short listing `vdb_print` emits, one grid per line:
/// `<name> <value type> (<bbox min>)->(<bbox max>) <dims> <voxels>`.
fn parse_listing(stdout: &str) -> Vec<GridMetadata> {
    stdout
        .lines()
        .filter_map(|line| listing_line().captures(line))
        .map(|caps| GridMetadata {
            name: caps["name"].to_string(),
            value_type: caps["type"].to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_listing() {
        let stdout = "\
density float (-62,-62,-62)->(62,62,62) 125x125x125 1.49M voxels
ls_bunny float (-3,0,-2)->(2,4,2) 6x5x5 102 voxels
";
        let grids = parse_listing(stdout);
        assert_eq!(grids.len(), 2);
        assert_eq!(grids[0].fingerprint(), "float@density");
        assert_eq!(grids[1].name, "ls_bunny");
    }

    #[test]
    fn ignores_lines_without_bbox() {
        let grids = parse_listing("vdb_print: warning: no grids\n\n");
        assert!(grids.is_empty());
    }

    #[test]
    fn codec_display_matches_serde() {
        assert_eq!(Codec::Blosc.to_string(), "blosc");
        let parsed: Codec = serde_json::from_str("\"zip\"").unwrap();
        assert_eq!(parsed, Codec::Zip);
    }

    #[cfg(unix)]
    mod stub_tools {
        use std::os::unix::fs::PermissionsExt;

        use camino::{Utf8Path, Utf8PathBuf};
        use tempfile::TempDir;

        use crate::error::RoundTripError;
        use crate::grid::{Codec, GridLibrary, VdbCliLibrary};

        const LISTING: &str = "\
density float (-62,-62,-62)->(62,62,62) 125x125x125 1.49M voxels
ls_bunny float (-3,0,-2)->(2,4,2) 6x5x5 102 voxels
";

        const PRINT: &str = r#"echo "${OPENVDB_DISABLE_DELAYED_LOAD:-unset}" >> @DIR@/print.env
cat "$1""#;

        const RENAMING_WRITER: &str = r#"printf '%s\n' "$3" "$4" "$5" "$6" > @DIR@/python.args
echo "${OPENVDB_DISABLE_DELAYED_LOAD:-unset}" > @DIR@/python.env
sed -n "$(($4 + 1))p" "$3" | sed "s/^[^ ]*/$5/" > "$6""#;

        struct Stubs {
            _temp: TempDir,
            dir: Utf8PathBuf,
        }

        impl Stubs {
            fn new() -> Self {
                let temp = tempfile::tempdir().unwrap();
                let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
                Self { _temp: temp, dir }
            }

            fn tool(&self, name: &str, body: &str) -> Utf8PathBuf {
                let path = self.dir.join(name);
                let script = format!("#!/bin/sh\n{}\n", body.replace("@DIR@", self.dir.as_str()));
                std::fs::write(&path, script).unwrap();
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
                path
            }

            fn library(&self, writer: &str) -> VdbCliLibrary {
                VdbCliLibrary::new(self.tool("vdb_print", PRINT), self.tool("python3", writer))
            }

            fn grid_file(&self) -> Utf8PathBuf {
                let path = self.dir.join("bunny.vdb");
                std::fs::write(&path, LISTING).unwrap();
                path
            }

            fn read(&self, name: &str) -> String {
                std::fs::read_to_string(self.dir.join(name)).unwrap()
            }
        }

        #[test]
        fn write_sends_one_renamed_grid_to_the_writer() {
            let stubs = Stubs::new();
            let library = stubs.library(RENAMING_WRITER);
            let source = stubs.grid_file();
            let output = stubs.dir.join("bunny_out.vdb");

            let mut grid = library.read_all(&source).unwrap().remove(1);
            grid.rename("ls_bunny_output");
            library.write(&output, &grid, Codec::Blosc).unwrap();

            assert_eq!(
                stubs.read("python.args"),
                format!("{source}\n1\nls_bunny_output\n{output}\n")
            );
            assert_eq!(stubs.read("python.env"), "1\n");
            let written = library.read_metadata(&output).unwrap();
            assert_eq!(written.len(), 1);
            assert_eq!(written[0].fingerprint(), "float@ls_bunny_output");
        }

        #[test]
        fn only_full_reads_disable_delayed_loading() {
            let stubs = Stubs::new();
            let library = stubs.library(RENAMING_WRITER);
            let source = stubs.grid_file();

            assert_eq!(library.read_all(&source).unwrap().len(), 2);
            assert_eq!(library.read_metadata(&source).unwrap().len(), 2);

            assert_eq!(stubs.read("print.env"), "1\nunset\n");
        }

        #[test]
        fn writer_that_drops_the_rename_is_an_error() {
            let stubs = Stubs::new();
            let library = stubs.library(r#"cp "$3" "$6""#);
            let source = stubs.grid_file();
            let output = stubs.dir.join("bunny_out.vdb");

            let mut grid = library.read_all(&source).unwrap().remove(0);
            grid.rename("density_output");
            let result = library.write(&output, &grid, Codec::Blosc);

            assert!(
                matches!(&result, Err(RoundTripError::GridTool(message)) if message.contains("density_output")),
                "{result:?}"
            );
        }

        #[test]
        fn non_default_codec_is_refused_before_writing() {
            let stubs = Stubs::new();
            let library = stubs.library(RENAMING_WRITER);
            let source = stubs.grid_file();
            let grid = library.read_all(&source).unwrap().remove(0);

            let result = library.write(&stubs.dir.join("out.vdb"), &grid, Codec::Zip);

            assert!(matches!(result, Err(RoundTripError::GridTool(_))));
            assert!(!stubs.dir.join("python.args").exists());
        }

        #[test]
        fn failing_tool_reports_its_stderr() {
            let stubs = Stubs::new();
            let library = VdbCliLibrary::new(
                stubs.tool("vdb_print", r#"echo "could not open file" >&2; exit 1"#),
                "python3",
            );

            let result = library.read_metadata(Utf8Path::new("missing.vdb"));

            assert!(matches!(result, Err(RoundTripError::GridTool(message)) if message == "could not open file"));
        }

        #[test]
        fn absent_tool_is_reported_as_missing() {
            let library = VdbCliLibrary::new("/nonexistent/vdb_print", "/nonexistent/python3");
            let result = library.read_metadata(Utf8Path::new("bunny.vdb"));
            assert!(matches!(result, Err(RoundTripError::MissingTool(tool)) if tool.contains("vdb_print")));
        }
    }
}
