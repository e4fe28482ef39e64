use crate::util::{Output, api_request};

pub async fn run(api_url: &str, output: Output) -> i32 {
    api_request(api_url, reqwest::Method::GET, "/health", None, output).await
}
