use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, trace};

use super::index::{HashIndex, IndexEntry};
use super::SimilarityOracle;
use crate::error::Error;

/// Adapter over the `ssdeep` command-line tool.
///
/// Comparisons run `ssdeep -s -x -k <known> <signatures>` in signature-file
/// mode, with the reference index as the signature side, so every report line
/// names the reference file before the `matches` marker and the candidate
/// after it.
pub struct SsdeepOracle {
    program: String,
    scratch_dir: PathBuf,
}

impl SsdeepOracle {
    pub fn new(program: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    fn run(&self, args: &[&OsStr]) -> std::io::Result<Output> {
        trace!("Running {} {:?}", self.program, args);
        Command::new(&self.program).args(args).output()
    }

    fn compare(&self, known: &Path, signatures: &Path) -> std::io::Result<Output> {
        self.run(&[
            OsStr::new("-s"),
            OsStr::new("-x"),
            OsStr::new("-k"),
            known.as_os_str(),
            signatures.as_os_str(),
        ])
    }
}

impl SimilarityOracle for SsdeepOracle {
    fn fingerprint(&self, file: &Path) -> Result<String, Error> {
        let output = self.run(&[file.as_os_str()]).map_err(|e| Error::Oracle {
            file: file.to_path_buf(),
            reason: format!("{} execution failed: {}", self.program, e),
        })?;
        if !output.status.success() {
            return Err(Error::Oracle {
                file: file.to_path_buf(),
                reason: stderr_summary(&output),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with("ssdeep,"))
            .last()
            .and_then(|line| line.split_once(",\""))
            .map(|(fingerprint, _)| fingerprint.to_string())
            .ok_or_else(|| Error::Oracle {
                file: file.to_path_buf(),
                reason: "no signature in output".to_string(),
            })
    }

    fn compare_indexes(
        &self,
        reference_index: &Path,
        candidate_index: &Path,
    ) -> Result<String, Error> {
        let output =
            self.compare(candidate_index, reference_index)
                .map_err(|e| Error::OracleUnavailable {
                    reason: format!("{} execution failed: {}", self.program, e),
                })?;
        if !output.status.success() {
            return Err(Error::OracleUnavailable {
                reason: format!(
                    "batch comparison exited with {}: {}",
                    output.status,
                    stderr_summary(&output)
                ),
            });
        }

        let report = String::from_utf8_lossy(&output.stdout);
        Ok(strip_index_prefixes(
            &report,
            &[reference_index, candidate_index],
        ))
    }

    fn compare_single(&self, reference_index: &Path, file: &Path) -> Result<String, Error> {
        let fingerprint = self.fingerprint(file)?;
        let single = HashIndex {
            entries: vec![IndexEntry {
                fingerprint,
                path: file.to_string_lossy().into_owned(),
            }],
        };
        let sig_path = self.scratch_dir.join("single.sig");
        single.write(&sig_path)?;

        let output = self
            .compare(&sig_path, reference_index)
            .map_err(|e| Error::Oracle {
                file: file.to_path_buf(),
                reason: format!("{} execution failed: {}", self.program, e),
            })?;
        if !output.status.success() {
            return Err(Error::Oracle {
                file: file.to_path_buf(),
                reason: stderr_summary(&output),
            });
        }

        let report = String::from_utf8_lossy(&output.stdout);
        debug!("{} raw match lines for {}", report.lines().count(), file.display());
        Ok(strip_index_prefixes(&report, &[reference_index, sig_path.as_path()]))
    }
}

fn stderr_summary(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let first = stderr.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        format!("exit status {}", output.status)
    } else {
        first.to_string()
    }
}

/// ssdeep prefixes identities from signature files with `<sigfile>:`.
fn strip_index_prefixes(report: &str, indexes: &[&Path]) -> String {
    let mut out = report.to_string();
    for index in indexes {
        let prefix = format!("{}:", index.display());
        out = out.replace(&prefix, "");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_index_prefixes() {
        let report = "/s/ref.idx:/ref/a.jpg matches /s/cand.idx:/rec/b.jpg (95)\n";
        let cleaned = strip_index_prefixes(
            report,
            &[Path::new("/s/ref.idx"), Path::new("/s/cand.idx")],
        );
        assert_eq!(cleaned, "/ref/a.jpg matches /rec/b.jpg (95)\n");
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use crate::oracle::index::INDEX_HEADER;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        /// Stand-in `ssdeep` that appends its argv to `argv.log` and prints
        /// `compare_out` for `-s` invocations, `hash_out` otherwise.
        fn fake_ssdeep(dir: &Path, hash_out: &str, compare_out: &str, exit: i32) -> PathBuf {
            let script = dir.join("fake-ssdeep");
            let body = format!(
                "#!/bin/sh\n\
                 echo \"$*\" >> '{log}'\n\
                 if [ \"$1\" = \"-s\" ]; then\n\
                 cat <<'OUT'\n{compare}\nOUT\n\
                 else\n\
                 cat <<'OUT'\n{hash}\nOUT\n\
                 fi\n\
                 exit {exit}\n",
                log = dir.join("argv.log").display(),
                compare = compare_out,
                hash = hash_out,
                exit = exit,
            );
            fs::write(&script, body).unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            script
        }

        fn argv(dir: &Path) -> Vec<String> {
            fs::read_to_string(dir.join("argv.log"))
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }

        #[test]
        fn test_fingerprint_reads_signature_row() {
            let tmp = tempfile::tempdir().unwrap();
            let hash_out = format!("{}\n3:abc:def,\"/rec/b.jpg\"", INDEX_HEADER);
            let program = fake_ssdeep(tmp.path(), &hash_out, "", 0);
            let oracle = SsdeepOracle::new(program.to_string_lossy(), tmp.path());

            let fingerprint = oracle.fingerprint(Path::new("/rec/b.jpg")).unwrap();

            assert_eq!(fingerprint, "3:abc:def");
            assert_eq!(argv(tmp.path()), vec!["/rec/b.jpg".to_string()]);
        }

        #[test]
        fn test_compare_indexes_uses_signature_mode() {
            let tmp = tempfile::tempdir().unwrap();
            let reference = tmp.path().join("reference.idx");
            let candidates = tmp.path().join("candidates.idx");
            let report = format!(
                "{}:/ref/a.jpg matches {}:/rec/b.jpg (95)",
                reference.display(),
                candidates.display()
            );
            let program = fake_ssdeep(tmp.path(), "", &report, 0);
            let oracle = SsdeepOracle::new(program.to_string_lossy(), tmp.path());

            let out = oracle.compare_indexes(&reference, &candidates).unwrap();

            assert_eq!(out.trim(), "/ref/a.jpg matches /rec/b.jpg (95)");
            assert_eq!(
                argv(tmp.path()),
                vec![format!(
                    "-s -x -k {} {}",
                    candidates.display(),
                    reference.display()
                )]
            );
        }

        #[test]
        fn test_failed_batch_is_unavailable() {
            let tmp = tempfile::tempdir().unwrap();
            let program = fake_ssdeep(tmp.path(), "", "", 1);
            let oracle = SsdeepOracle::new(program.to_string_lossy(), tmp.path());

            let result = oracle.compare_indexes(
                &tmp.path().join("reference.idx"),
                &tmp.path().join("candidates.idx"),
            );

            assert!(matches!(result, Err(Error::OracleUnavailable { .. })));
        }

        #[test]
        fn test_compare_single_writes_one_entry_signature_file() {
            let tmp = tempfile::tempdir().unwrap();
            let reference = tmp.path().join("reference.idx");
            let sig = tmp.path().join("single.sig");
            let hash_out = format!("{}\n6:ghi:jkl,\"/rec/c.jpg\"", INDEX_HEADER);
            let report = format!(
                "{}:/ref/a.jpg matches {}:/rec/c.jpg (88)",
                reference.display(),
                sig.display()
            );
            let program = fake_ssdeep(tmp.path(), &hash_out, &report, 0);
            let oracle = SsdeepOracle::new(program.to_string_lossy(), tmp.path());

            let out = oracle
                .compare_single(&reference, Path::new("/rec/c.jpg"))
                .unwrap();

            assert_eq!(out.trim(), "/ref/a.jpg matches /rec/c.jpg (88)");
            let single = HashIndex::read(&sig).unwrap();
            assert_eq!(single.entries[0].fingerprint, "6:ghi:jkl");
            assert_eq!(single.entries[0].path, "/rec/c.jpg");
            assert_eq!(
                argv(tmp.path()),
                vec![
                    "/rec/c.jpg".to_string(),
                    format!("-s -x -k {} {}", sig.display(), reference.display()),
                ]
            );
        }
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let oracle = SsdeepOracle::new("definitely-not-an-ssdeep-binary", tmp.path());
        let result = oracle.compare_indexes(&tmp.path().join("r"), &tmp.path().join("c"));
        assert!(matches!(result, Err(Error::OracleUnavailable { .. })));
    }
}
