//! Classification of agent stderr into error categories.

use agent_relay_core::ErrorKind;

/// Benign output that must never be reported as an error.
const NOISE: &[&str] = &[
    "WARNING: Running pip as the 'root' user",
    "[notice] A new release of pip",
    "[notice] To update, run:",
    "WARNING: You are using pip version",
    "You should consider upgrading via",
    "WARNING: There was an error checking the latest version of pip",
];

/// Failure signatures, checked in order; the first match wins.
const SIGNATURES: &[(&str, ErrorKind)] = &[
    ("No module named", ErrorKind::MissingModule),
    ("ModuleNotFoundError", ErrorKind::MissingModule),
    ("FileNotFoundError", ErrorKind::MissingFile),
    ("openai.BadRequestError", ErrorKind::UpstreamRequestError),
    ("Invalid JSON", ErrorKind::UpstreamRequestError),
    ("ConnectionError", ErrorKind::ConnectivityError),
];

/// Result of inspecting stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StderrDiagnosis {
    pub kind: ErrorKind,
    /// The line that determined the classification.
    pub excerpt: String,
}

impl StderrDiagnosis {
    /// User-facing detail text.
    #[must_use]
    pub fn detail(&self) -> String {
        if self.excerpt.is_empty() {
            self.kind.description().to_string()
        } else {
            format!("{} ({})", self.kind.description(), self.excerpt)
        }
    }
}

/// Drop noise lines and blank lines.
#[must_use]
pub fn strip_noise(stderr: &str) -> Vec<&str> {
    stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !NOISE.iter().any(|noise| line.contains(noise)))
        .collect()
}

/// Classify stderr. `None` means nothing worth reporting.
#[must_use]
pub fn classify_stderr(stderr: &str) -> Option<StderrDiagnosis> {
    let lines = strip_noise(stderr);
    if lines.is_empty() {
        return None;
    }

    for (needle, kind) in SIGNATURES {
        if let Some(line) = lines.iter().find(|line| line.contains(needle)) {
            return Some(StderrDiagnosis {
                kind: *kind,
                excerpt: line.trim().to_string(),
            });
        }
    }

    Some(StderrDiagnosis {
        kind: ErrorKind::Unclassified,
        excerpt: lines.last().map(|l| l.trim().to_string()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIP_NOISE: &str = "WARNING: Running pip as the 'root' user can result in broken permissions and conflicting behaviour with the system package manager.\n\n[notice] A new release of pip is available: 23.0.1 -> 24.0\n[notice] To update, run: pip install --upgrade pip\n";

    #[test]
    fn test_missing_module() {
        let stderr = "Traceback (most recent call last):\n  File \"/app/entrypoint.py\", line 3, in <module>\nModuleNotFoundError: No module named 'langchain'\n";
        let diagnosis = classify_stderr(stderr).unwrap();
        assert_eq!(diagnosis.kind, ErrorKind::MissingModule);
        assert_eq!(diagnosis.excerpt, "ModuleNotFoundError: No module named 'langchain'");
    }

    #[test]
    fn test_pip_noise_only_is_no_error() {
        assert_eq!(classify_stderr(PIP_NOISE), None);
        assert_eq!(classify_stderr(""), None);
        assert_eq!(classify_stderr("\n  \n"), None);
    }

    #[test]
    fn test_noise_does_not_hide_real_error() {
        let stderr = format!("{PIP_NOISE}openai.APIConnectionError: Connection error.\n");
        let diagnosis = classify_stderr(&stderr).unwrap();
        assert_eq!(diagnosis.kind, ErrorKind::ConnectivityError);
    }

    #[test]
    fn test_first_signature_wins() {
        // A missing file that itself mentions a connection problem.
        let stderr = "FileNotFoundError: [Errno 2] No such file: 'ConnectionError.log'\n";
        assert_eq!(classify_stderr(stderr).unwrap().kind, ErrorKind::MissingFile);

        let stderr = "openai.BadRequestError: Error code: 400\nNo module named 'x'\n";
        assert_eq!(classify_stderr(stderr).unwrap().kind, ErrorKind::MissingModule);
    }

    #[test]
    fn test_upstream_request_error() {
        let stderr = "openai.BadRequestError: Error code: 400 - {'error': 'Invalid JSON body'}";
        assert_eq!(
            classify_stderr(stderr).unwrap().kind,
            ErrorKind::UpstreamRequestError
        );
    }

    #[test]
    fn test_unclassified_uses_last_line() {
        let stderr = "Traceback (most recent call last):\nZeroDivisionError: division by zero\n";
        let diagnosis = classify_stderr(stderr).unwrap();
        assert_eq!(diagnosis.kind, ErrorKind::Unclassified);
        assert_eq!(diagnosis.excerpt, "ZeroDivisionError: division by zero");
        assert!(diagnosis.detail().ends_with("(ZeroDivisionError: division by zero)"));
    }
}
