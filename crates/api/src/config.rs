use sketchmap_core::validation::UploadLimits;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Limits checked before uploads are stored.
    pub upload_limits: UploadLimits,
    /// Largest accepted request body on the upload route.
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `HOST`                    | `0.0.0.0`                  |
    /// | `PORT`                    | `8080`                     |
    /// | `CORS_ORIGINS`            | `http://localhost:8080`    |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                       |
    /// | `SMT_MAX_NR_SIM_UPLOADS`  | `100`                      |
    /// | `SMT_MAX_PIXEL_PER_IMAGE` | `10e8`                     |
    /// | `SMT_MAX_UPLOAD_BYTES`    | `536870912` (512 MiB)      |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:8080".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let max_files: usize = std::env::var("SMT_MAX_NR_SIM_UPLOADS")
            .unwrap_or_else(|_| "100".into())
            .parse()
            .expect("SMT_MAX_NR_SIM_UPLOADS must be a valid usize");

        // Accepts scientific notation such as `10e8`.
        let max_pixels: f64 = std::env::var("SMT_MAX_PIXEL_PER_IMAGE")
            .unwrap_or_else(|_| "10e8".into())
            .parse()
            .expect("SMT_MAX_PIXEL_PER_IMAGE must be a number");
        assert!(max_pixels >= 1.0, "SMT_MAX_PIXEL_PER_IMAGE must be positive");

        let max_upload_bytes: usize = std::env::var("SMT_MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| (512 * 1024 * 1024).to_string())
            .parse()
            .expect("SMT_MAX_UPLOAD_BYTES must be a valid usize");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            upload_limits: UploadLimits {
                max_files,
                max_pixels_per_image: max_pixels as u64,
            },
            max_upload_bytes,
        }
    }
}
