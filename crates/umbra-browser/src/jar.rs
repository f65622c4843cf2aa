//! Cookie jar bridge
//!
//! Converts between the browser's CDP cookie types and the neutral
//! [`CookieRecord`] used by the session layer, and reads/writes a page's
//! jar. Expired cookies are never installed.

use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::Page;
use tracing::debug;

use umbra_session::{epoch_now, CookieRecord, SameSite};

use crate::error::BrowserResult;

/// Read the page's cookie jar into neutral records.
pub async fn extract(page: &Page) -> BrowserResult<Vec<CookieRecord>> {
    let now = epoch_now();
    let cookies = page.get_cookies().await?;
    let records: Vec<CookieRecord> = cookies.iter().map(|c| cookie_to_record(c, now)).collect();
    debug!(count = records.len(), "extracted cookies from jar");
    Ok(records)
}

/// Write non-expired records into the page's jar.
pub async fn install(page: &Page, records: &[CookieRecord]) -> BrowserResult<usize> {
    let now = epoch_now();
    let params: Vec<CookieParam> = records
        .iter()
        .filter(|r| !r.is_expired_at(now))
        .map(record_to_param)
        .collect();

    let count = params.len();
    if count > 0 {
        page.set_cookies(params).await?;
    }
    debug!(count, "installed cookies into jar");
    Ok(count)
}

fn cookie_to_record(cookie: &Cookie, now: f64) -> CookieRecord {
    let expires = if cookie.session {
        None
    } else {
        let raw = cookie.expires;
        (raw > 0.0).then_some(raw)
    };

    CookieRecord {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: cookie.domain.clone(),
        path: cookie.path.clone(),
        expires,
        http_only: cookie.http_only,
        secure: cookie.secure,
        same_site: cookie
            .same_site
            .as_ref()
            .map(same_site_from_cdp)
            .unwrap_or_default(),
        creation_time: now,
        last_access: now,
    }
}

pub(crate) fn record_to_param(record: &CookieRecord) -> CookieParam {
    let mut param = CookieParam::new(record.name.clone(), record.value.clone());
    param.domain = Some(record.domain.clone());
    param.path = Some(record.path.clone());
    param.http_only = Some(record.http_only);
    param.secure = Some(record.secure);
    param.same_site = Some(same_site_to_cdp(record.same_site));
    param.expires = record.expires.map(TimeSinceEpoch::new);
    param
}

fn same_site_from_cdp(same_site: &CookieSameSite) -> SameSite {
    match same_site {
        CookieSameSite::Strict => SameSite::Strict,
        CookieSameSite::Lax => SameSite::Lax,
        CookieSameSite::None => SameSite::None,
    }
}

fn same_site_to_cdp(same_site: SameSite) -> CookieSameSite {
    match same_site {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires: Option<f64>) -> CookieRecord {
        CookieRecord {
            name: "sid".to_string(),
            value: "v123".to_string(),
            domain: "ex.com".to_string(),
            path: "/".to_string(),
            expires,
            http_only: true,
            secure: true,
            same_site: SameSite::Strict,
            creation_time: 0.0,
            last_access: 0.0,
        }
    }

    #[test]
    fn param_carries_all_attributes() {
        let param = record_to_param(&record(Some(2_000_000_000.0)));
        assert_eq!(param.name, "sid");
        assert_eq!(param.value, "v123");
        assert_eq!(param.domain.as_deref(), Some("ex.com"));
        assert_eq!(param.path.as_deref(), Some("/"));
        assert_eq!(param.http_only, Some(true));
        assert_eq!(param.secure, Some(true));
        assert!(matches!(param.same_site, Some(CookieSameSite::Strict)));
        assert!(param.expires.is_some());
    }

    #[test]
    fn session_cookie_has_no_expiry() {
        let param = record_to_param(&record(None));
        assert!(param.expires.is_none());
    }

    #[test]
    fn same_site_round_trips() {
        for mode in [SameSite::Strict, SameSite::Lax, SameSite::None] {
            assert_eq!(same_site_from_cdp(&same_site_to_cdp(mode)), mode);
        }
    }
}
