// Status, issuer, validity-window and audience checks on a verified response.

use chrono::{DateTime, Duration, Utc};

use sso_bridge_core::error::{Result, SsoError};

use crate::response::{SamlAssertion, SamlResponse};

/// Allowed clock drift between us and the IdP.
pub const CLOCK_SKEW_SECS: i64 = 60;

/// What a response is checked against.
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    pub now: DateTime<Utc>,
    pub skew: Duration,
    /// Our entity id; must appear in any `AudienceRestriction`.
    pub sp_entity_id: &'a str,
    /// Expected issuer. Empty disables the check.
    pub idp_entity_id: &'a str,
    /// Our ACS URL; `Destination` and `Recipient` must match when present.
    pub acs_url: &'a str,
}

impl<'a> ValidationContext<'a> {
    pub fn new(now: DateTime<Utc>, sp_entity_id: &'a str, idp_entity_id: &'a str, acs_url: &'a str) -> Self {
        Self {
            now,
            skew: Duration::seconds(CLOCK_SKEW_SECS),
            sp_entity_id,
            idp_entity_id,
            acs_url,
        }
    }
}

fn unmet(msg: impl Into<String>) -> SsoError {
    SsoError::AssertionConditions(msg.into())
}

/// Check a parsed response and return its assertion.
pub fn validate_conditions<'r>(
    response: &'r SamlResponse,
    ctx: &ValidationContext<'_>,
) -> Result<&'r SamlAssertion> {
    if !response.is_success() {
        let detail = response
            .status_message
            .as_deref()
            .map(|m| format!("{} ({m})", response.status_code))
            .unwrap_or_else(|| response.status_code.clone());
        return Err(SsoError::ProviderRejected(format!("SAML status {detail}")));
    }

    let assertion = response
        .assertion
        .as_ref()
        .ok_or_else(|| SsoError::InvalidSamlResponse("response carries no assertion".into()))?;

    if !ctx.acs_url.is_empty() {
        if let Some(destination) = response.destination.as_deref() {
            if destination != ctx.acs_url {
                return Err(unmet(format!("unexpected Destination {destination}")));
            }
        }
        if let Some(recipient) = assertion.recipient.as_deref() {
            if recipient != ctx.acs_url {
                return Err(unmet(format!("unexpected Recipient {recipient}")));
            }
        }
    }

    if !ctx.idp_entity_id.is_empty() {
        let issuer = assertion.issuer.as_deref().or(response.issuer.as_deref());
        if let Some(issuer) = issuer {
            if issuer != ctx.idp_entity_id {
                return Err(unmet(format!("unexpected issuer {issuer}")));
            }
        }
    }

    if let Some(not_before) = assertion.not_before {
        if ctx.now + ctx.skew < not_before {
            return Err(unmet("assertion is not yet valid"));
        }
    }
    for limit in [assertion.not_on_or_after, assertion.subject_not_on_or_after]
        .into_iter()
        .flatten()
    {
        if ctx.now - ctx.skew >= limit {
            return Err(unmet("assertion has expired"));
        }
    }

    if !assertion.audiences.is_empty()
        && !assertion.audiences.iter().any(|a| a == ctx.sp_entity_id)
    {
        return Err(unmet(format!(
            "audience does not include {}",
            ctx.sp_entity_id
        )));
    }

    Ok(assertion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::STATUS_SUCCESS;

    const SP: &str = "https://sp.example.com";
    const IDP: &str = "https://idp.example.com";
    const ACS: &str = "https://sp.example.com/acs";

    fn response(now: DateTime<Utc>) -> SamlResponse {
        SamlResponse {
            id: Some("_r".into()),
            destination: Some(ACS.into()),
            in_response_to: None,
            issuer: Some(IDP.into()),
            status_code: STATUS_SUCCESS.into(),
            status_message: None,
            assertion: Some(SamlAssertion {
                id: "_a".into(),
                issuer: Some(IDP.into()),
                name_id: "user@example.com".into(),
                not_before: Some(now - Duration::minutes(1)),
                not_on_or_after: Some(now + Duration::minutes(5)),
                audiences: vec![SP.into()],
                recipient: Some(ACS.into()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_valid_response_passes() {
        let now = Utc::now();
        let resp = response(now);
        let a = validate_conditions(&resp, &ValidationContext::new(now, SP, IDP, ACS)).unwrap();
        assert_eq!(a.name_id, "user@example.com");
    }

    #[test]
    fn test_status_failure_is_provider_rejection() {
        let now = Utc::now();
        let mut resp = response(now);
        resp.status_code = "urn:oasis:names:tc:SAML:2.0:status:Responder".into();
        resp.status_message = Some("no such user".into());
        let err = validate_conditions(&resp, &ValidationContext::new(now, SP, IDP, ACS)).unwrap_err();
        assert!(matches!(err, SsoError::ProviderRejected(ref m) if m.contains("no such user")));
    }

    #[test]
    fn test_expiry_respects_skew() {
        let now = Utc::now();
        let resp = response(now);
        let expires = resp.assertion.as_ref().unwrap().not_on_or_after.unwrap();

        let within_skew = ValidationContext::new(expires + Duration::seconds(30), SP, IDP, ACS);
        assert!(validate_conditions(&resp, &within_skew).is_ok());

        let past_skew = ValidationContext::new(expires + Duration::seconds(61), SP, IDP, ACS);
        let err = validate_conditions(&resp, &past_skew).unwrap_err();
        assert_eq!(err, SsoError::AssertionConditions("assertion has expired".into()));
    }

    #[test]
    fn test_not_yet_valid() {
        let now = Utc::now();
        let resp = response(now);
        let early = ValidationContext::new(now - Duration::minutes(5), SP, IDP, ACS);
        assert!(validate_conditions(&resp, &early).is_err());
    }

    #[test]
    fn test_audience_and_issuer() {
        let now = Utc::now();
        let resp = response(now);
        assert!(validate_conditions(&resp, &ValidationContext::new(now, "https://other", IDP, ACS)).is_err());
        assert!(validate_conditions(&resp, &ValidationContext::new(now, SP, "https://evil", ACS)).is_err());
        assert!(validate_conditions(&resp, &ValidationContext::new(now, SP, "", ACS)).is_ok());
    }

    #[test]
    fn test_destination_mismatch() {
        let now = Utc::now();
        let resp = response(now);
        let ctx = ValidationContext::new(now, SP, IDP, "https://sp.example.com/other");
        assert!(validate_conditions(&resp, &ctx).is_err());
    }
}
