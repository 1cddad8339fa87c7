use std::process::exit;

use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use entra_token::{
    normalize_authority, render_outcome, request_token, resource_scopes, ConfidentialClient,
};

/// Fetch a client-credentials access token from Microsoft Entra ID and print
/// it to stdout.
#[derive(Parser, Debug)]
#[command(name = "auth", version, about, long_about = None)]
struct Cli {
    /// Application key (client secret)
    #[arg(short = 'k', value_name = "APP KEY", value_parser = NonEmptyStringValueParser::new())]
    app_key: String,

    /// Authority (issuer) URL
    #[arg(short = 'a', value_name = "AUTHORITY", value_parser = NonEmptyStringValueParser::new())]
    authority: String,

    /// Resource (API audience) to request a token for
    #[arg(short = 'r', value_name = "RESOURCE", value_parser = NonEmptyStringValueParser::new())]
    resource: String,

    /// Application (client) id
    #[arg(short = 'c', value_name = "CLIENT ID", value_parser = NonEmptyStringValueParser::new())]
    client_id: String,

    /// Directory (tenant) id
    #[arg(short = 't', value_name = "TENANT ID", value_parser = NonEmptyStringValueParser::new())]
    tenant_id: String,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let authority = normalize_authority(&cli.authority, &cli.tenant_id);
    let scopes = resource_scopes(&cli.resource);
    let client = ConfidentialClient::new(&cli.client_id, &authority, &cli.app_key);

    match request_token(&client, &scopes) {
        // An error payload from the identity provider is printed as content,
        // not signalled through the exit status.
        Ok(outcome) => println!("{}", render_outcome(&outcome)),
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}
