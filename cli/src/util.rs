use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
    std::process::exit(4);
}

/// Output options shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    /// Compact JSON instead of pretty-printed.
    pub raw: bool,
}

impl Output {
    pub fn format(&self, value: &serde_json::Value) -> String {
        let formatted = if self.raw {
            serde_json::to_string(value)
        } else {
            serde_json::to_string_pretty(value)
        };
        formatted.unwrap_or_else(|_| value.to_string())
    }
}

/// Maps an HTTP status to the CLI exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Execute an API request, print the response, exit with structured code.
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<serde_json::Value>,
    output: Output,
) -> i32 {
    match raw_api_request(api_url, method, path, body).await {
        Ok((status, resp_body)) => {
            let exit_code = exit_code_for(status);
            let formatted = output.format(&resp_body);
            if exit_code == 0 {
                println!("{formatted}");
            } else {
                eprintln!("{formatted}");
            }
            exit_code
        }
        Err(code) => code,
    }
}

/// Execute an API request and return the status and JSON body without
/// printing. Connection and URL failures are reported on stderr and turned
/// into their exit code.
pub async fn raw_api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<serde_json::Value>,
) -> Result<(u16, serde_json::Value), i32> {
    let url = match reqwest::Url::parse(&format!("{}{path}", api_url.trim_end_matches('/'))) {
        Ok(u) => u,
        Err(e) => {
            let err = json!({
                "error": "cli_error",
                "message": format!("Invalid URL: {api_url}{path}: {e}")
            });
            eprintln!("{}", Output::default().format(&err));
            return Err(4);
        }
    };

    let mut req = client().request(method, url);
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check HB_API_URL."
            });
            eprintln!("{}", Output::default().format(&err));
            return Err(3);
        }
    };

    let status = resp.status().as_u16();
    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };
    Ok((status, resp_body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_status_class() {
        assert_eq!(exit_code_for(201), 0);
        assert_eq!(exit_code_for(404), 1);
        assert_eq!(exit_code_for(429), 1);
        assert_eq!(exit_code_for(503), 2);
    }

    #[test]
    fn raw_output_is_single_line() {
        let value = json!({"status": "ok", "version": "0.1.0"});
        assert!(!Output { raw: true }.format(&value).contains('\n'));
        assert!(Output { raw: false }.format(&value).contains('\n'));
    }
}
