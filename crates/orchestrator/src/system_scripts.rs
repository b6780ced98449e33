//! Scripts the gateway runs on a worker on its own behalf.

use srs_core::execution::{OutputFormat, ScriptParameter, ScriptRequest};

pub const CONNECT_VC_SCRIPT_NAME: &str = "powerclivclogin";
pub const DISCONNECT_ALL_SERVERS_SCRIPT_NAME: &str = "disconnectallservers";

const CONNECT_BY_SAML_TOKEN: &str = r#"param(
    [Parameter(Mandatory = $true)][string] $server,
    [Parameter(Mandatory = $true)][string] $samlToken,
    [bool] $allLinked = $false
)
Connect-VIServer -Server $server -SamlToken $samlToken -AllLinked:$allLinked | Out-Null
"#;

const DISCONNECT_ALL_SERVERS: &str = r#"if ($global:DefaultVIServers) {
    Disconnect-VIServer -Server * -Force -Confirm:$false
}
"#;

/// Connect the worker's PowerCLI session to `server` with a bearer token.
pub fn connect_vc(server: &str, saml_token: &str) -> ScriptRequest {
    ScriptRequest::new(CONNECT_BY_SAML_TOKEN)
        .with_name(CONNECT_VC_SCRIPT_NAME)
        .with_format(OutputFormat::Json)
        .with_parameter(ScriptParameter::new("server", server))
        .with_parameter(ScriptParameter::new("samlToken", saml_token))
        .with_parameter(ScriptParameter::new("allLinked", true))
        .system()
}

/// Close every VC connection the worker holds.
pub fn disconnect_all_servers() -> ScriptRequest {
    ScriptRequest::new(DISCONNECT_ALL_SERVERS)
        .with_name(DISCONNECT_ALL_SERVERS_SCRIPT_NAME)
        .with_format(OutputFormat::Json)
        .system()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_vc_is_a_json_system_script() {
        let request = connect_vc("vc.example.com", "token");

        assert!(request.is_system);
        assert_eq!(request.output_format, OutputFormat::Json);
        assert_eq!(request.name.as_deref(), Some(CONNECT_VC_SCRIPT_NAME));
        let names: Vec<_> = request.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["server", "samlToken", "allLinked"]);
        assert_eq!(request.parameters[2].value, serde_json::Value::Bool(true));
    }
}
