use chrono::{DateTime, Utc};

use super::EmailMessage;

pub fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn interview_link(app_base_url: &str, token: &str) -> String {
    format!("{}/interview?token={}", app_base_url.trim_end_matches('/'), token)
}

fn layout(heading: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body style=\"font-family:Arial,sans-serif;color:#1f2937;\">\
         <div style=\"max-width:560px;margin:0 auto;padding:24px;\">\
         <h2 style=\"color:#4f46e5;\">{heading}</h2>{body}\
         <p style=\"color:#6b7280;font-size:12px;margin-top:32px;\">This is an automated message from the hiring team.</p>\
         </div></body></html>"
    )
}

/// Deep link to an AI-scored assessment for the stage the candidate just reached.
pub fn invitation(
    to: &str,
    candidate_name: &str,
    job_title: &str,
    stage_name: &str,
    link: &str,
    expires_at: DateTime<Utc>,
) -> EmailMessage {
    let name = html_escape(candidate_name);
    let job = html_escape(job_title);
    let stage = html_escape(stage_name);
    let body = format!(
        "<p>Hi {name},</p>\
         <p>Congratulations! You have advanced to the <strong>{stage}</strong> stage for <strong>{job}</strong>.</p>\
         <p>The next step is a short online assessment you can take at any time before \
         {expires}.</p>\
         <p style=\"margin:24px 0;\"><a href=\"{href}\" style=\"background:#4f46e5;color:#fff;padding:12px 20px;\
         border-radius:6px;text-decoration:none;\">Start your interview</a></p>\
         <p>The link can be used once.</p>",
        expires = expires_at.format("%B %-d, %Y %H:%M UTC"),
        href = html_escape(link),
    );
    EmailMessage {
        to: to.to_string(),
        subject: format!("Next step for {job_title}: {stage_name}"),
        html: layout("You're moving forward", &body),
    }
}

/// Notice for a human-run stage; the hiring team follows up directly.
pub fn stage_update(to: &str, candidate_name: &str, job_title: &str, stage_name: &str) -> EmailMessage {
    let body = format!(
        "<p>Hi {name},</p>\
         <p>Your application for <strong>{job}</strong> has moved to the <strong>{stage}</strong> stage.</p>\
         <p>The hiring team will contact you with the details shortly.</p>",
        name = html_escape(candidate_name),
        job = html_escape(job_title),
        stage = html_escape(stage_name),
    );
    EmailMessage {
        to: to.to_string(),
        subject: format!("Application update for {job_title}"),
        html: layout("Application update", &body),
    }
}

pub fn hired(to: &str, candidate_name: &str, job_title: &str) -> EmailMessage {
    let body = format!(
        "<p>Hi {name},</p>\
         <p>You have completed every stage for <strong>{job}</strong>. \
         The hiring team will reach out with your offer details.</p>",
        name = html_escape(candidate_name),
        job = html_escape(job_title),
    );
    EmailMessage {
        to: to.to_string(),
        subject: format!("Congratulations! {job_title}"),
        html: layout("Congratulations", &body),
    }
}

pub fn rejected(to: &str, candidate_name: &str, job_title: &str) -> EmailMessage {
    let body = format!(
        "<p>Hi {name},</p>\
         <p>Thank you for your interest in <strong>{job}</strong>. After careful review we \
         have decided not to move forward with your application at this time.</p>\
         <p>We wish you the best in your search.</p>",
        name = html_escape(candidate_name),
        job = html_escape(job_title),
    );
    EmailMessage {
        to: to.to_string(),
        subject: format!("Your application for {job_title}"),
        html: layout("Application status", &body),
    }
}
