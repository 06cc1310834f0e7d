//! RFC-822 message bodies for the two outbound mails.

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Verification mail sent after registration; links to
/// `{confirm_url}/confirm?token=…`.
pub fn registration(
    username: &str,
    email: &str,
    ip: &str,
    token: &str,
) -> String {
    let config = crate::config::get();
    format!(
        "From: Noreply <{from}>\n\
         To: {username} <{email}>\n\
         Subject: {title}\n\
         \n\
         Hello, {username}\n\
         \n\
         We received a registration from IP {ip} using this email,\n\
         to confirm it is legitimate, please click the link below.\n\
         \n\
         {confirm_url}/confirm?token={token}\n\
         \n\
         If this request is unexpected, please ignore it and\n\
         no further action will be taken.\n\
         \n\
         If you have any questions or concerns about this\n\
         automated email, you can contact a real person at\n\
         {contact}.\n",
        from = config.email.from,
        title = config.email.title,
        confirm_url = config.email.confirm_url_base,
        contact = config.email.contact_person,
    )
}

/// Reset mail for the forgot-password flow; the link carries the
/// caller-supplied onward targets, url-encoded.
pub fn password_reset(
    username: &str,
    email: &str,
    ip: &str,
    token: &str,
    post_good: &str,
    post_bad: &str,
) -> String {
    let config = crate::config::get();
    format!(
        "From: Forgot Password Assistant Noreply <{from}>\n\
         To: {username} <{email}>\n\
         Subject: Password reset request\n\
         \n\
         Hello, {username}\n\
         \n\
         We received a password reset request from IP {ip} for this email,\n\
         to confirm you want to do that, please click the link below.\n\
         \n\
         {confirm_url}/forgot?token={token}&good={good}&bad={bad}\n\
         \n\
         If this request is unexpected, please ignore it and\n\
         no further action will be taken.\n\
         \n\
         If you have any questions or concerns about this\n\
         automated email, you can contact a real person at\n\
         {contact}.\n",
        from = config.email.from,
        confirm_url = config.email.confirm_url_base,
        good = urlencode(post_good),
        bad = urlencode(post_bad),
        contact = config.email.contact_person,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn registration_mail_links_the_confirm_endpoint() {
        testing::init();
        let body = registration("alice", "alice@x", "10.0.0.9", "ab12");
        assert!(body.starts_with("From: "));
        assert!(body.contains("To: alice <alice@x>"));
        assert!(body.contains("/confirm?token=ab12"));
        assert!(body.contains("10.0.0.9"));
    }

    #[test]
    fn reset_mail_encodes_onward_targets() {
        testing::init();
        let body = password_reset(
            "alice",
            "alice@x",
            "10.0.0.9",
            "ab12",
            "/reset ok",
            "/reset?bad=1",
        );
        assert!(body.contains("Subject: Password reset request"));
        assert!(body.contains("token=ab12"));
        assert!(body.contains("good=%2Freset+ok"));
        assert!(body.contains("bad=%2Freset%3Fbad%3D1"));
    }
}
