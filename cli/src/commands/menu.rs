use healthybites_core::menu::Menu;

use crate::util::{Output, api_request, raw_api_request};

pub async fn run(api_url: &str, markdown: bool, output: Output) -> i32 {
    if !markdown {
        return api_request(api_url, reqwest::Method::GET, "/v1/menu", None, output).await;
    }

    let (status, body) = match raw_api_request(api_url, reqwest::Method::GET, "/v1/menu", None).await {
        Ok(response) => response,
        Err(code) => return code,
    };
    match serde_json::from_value::<Menu>(body.clone()) {
        Ok(menu) if status == 200 => {
            println!("{}", menu.to_markdown());
            0
        }
        _ => {
            eprintln!("{}", output.format(&body));
            crate::util::exit_code_for(status).max(1)
        }
    }
}
