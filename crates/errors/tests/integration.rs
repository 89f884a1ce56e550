//! Integration tests for error types

#[cfg(test)]
mod tests {
    use smelt_errors::*;

    #[test]
    fn test_error_conversion() {
        let stage_err = StageError::LockTimeout {
            path: "/opt/smelt/stage/gcc.lock".into(),
            seconds: 60,
        };
        let err: Error = stage_err.into();
        assert!(matches!(err, Error::Stage(_)));
    }

    #[test]
    fn test_error_display() {
        let err = StageError::AllFetchersFailed {
            stage: "zlib-1.3.1".into(),
        };
        assert_eq!(err.to_string(), "all fetchers failed for zlib-1.3.1");
    }

    #[test]
    fn test_error_clone() {
        let err = FetchError::MissingDigest {
            file: "zlib-1.3.1.tar.gz".into(),
        };
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let err: Error = io_err.into();
        assert!(matches!(
            err,
            Error::Io {
                kind: std::io::ErrorKind::PermissionDenied,
                ..
            }
        ));
    }

    #[test]
    fn test_user_facing_codes() {
        let err: Error = StageError::Restage {
            stage: "diy".into(),
            reason: "source directory is not owned by smelt".into(),
        }
        .into();
        assert_eq!(err.user_code(), Some("stage.restage"));
        assert!(!err.is_retryable());

        let err: Error = FetchError::DownloadFailed {
            url: "https://example.com/a.tar.gz".into(),
            message: "connection reset".into(),
        }
        .into();
        assert!(err.is_retryable());
    }
}
