use std::collections::HashMap;

use tera::{Context, Tera};
use tracing::warn;

use reqflow_core::domain::notification::{NotificationEvent, NotificationKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Deterministic renderer over the embedded notification templates.
///
/// Rendering never fails: any template error falls back to a minimal generic
/// body, because a rendering problem must never block the workflow
/// transition that triggered the notification. All timestamps in rendered
/// bodies come from the event payload, so a retried send renders
/// byte-identical content.
pub struct TemplateRenderer {
    tera: Tera,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats an amount to 2 decimal places. Accepts the string form that
/// `rust_decimal` serializes to as well as plain numbers.
/// Usage: `total_amount | money`
fn tera_money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let num = match value {
        tera::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        tera::Value::String(s) => s.parse::<f64>().unwrap_or(0.0),
        tera::Value::Null => 0.0,
        _ => 0.0,
    };
    Ok(tera::Value::String(format!("{num:.2}")))
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut tera = Tera::default();
        tera.register_filter("money", tera_money_filter);

        let templates = [
            (
                "requisition_created.txt",
                include_str!("../../../templates/notifications/requisition_created.txt.tera"),
            ),
            (
                "requisition_pending.txt",
                include_str!("../../../templates/notifications/requisition_pending.txt.tera"),
            ),
            (
                "requisition_approved.txt",
                include_str!("../../../templates/notifications/requisition_approved.txt.tera"),
            ),
            (
                "requisition_rejected.txt",
                include_str!("../../../templates/notifications/requisition_rejected.txt.tera"),
            ),
            (
                "no_manager_found.txt",
                include_str!("../../../templates/notifications/no_manager_found.txt.tera"),
            ),
            ("arrival.txt", include_str!("../../../templates/notifications/arrival.txt.tera")),
            ("generic.txt", include_str!("../../../templates/notifications/generic.txt.tera")),
        ];

        for (name, source) in templates {
            tera.add_raw_template(name, source)
                .unwrap_or_else(|error| panic!("embedded template `{name}` is invalid: {error}"));
        }

        Self { tera }
    }

    pub fn render(&self, kind: NotificationKind, event: &NotificationEvent) -> RenderedMessage {
        let subject = subject_for(kind, event);
        let context = context_for(event);

        let template = template_for(kind);
        let body = match self.tera.render(template, &context) {
            Ok(body) => body,
            Err(error) => {
                warn!(
                    template,
                    kind = kind.as_str(),
                    requisition_id = %event.requisition().id.0,
                    error = %error,
                    "notification template failed to render; using generic fallback"
                );
                self.render_generic(&context)
            }
        };

        RenderedMessage { subject, body }
    }

    fn render_generic(&self, context: &Context) -> String {
        self.tera.render("generic.txt", context).unwrap_or_else(|_| {
            "There is an update on one of your requisitions.\n".to_string()
        })
    }
}

fn template_for(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::RequisitionCreated => "requisition_created.txt",
        NotificationKind::RequisitionPending => "requisition_pending.txt",
        NotificationKind::RequisitionApproved => "requisition_approved.txt",
        NotificationKind::RequisitionRejected => "requisition_rejected.txt",
        NotificationKind::NoManagerFound => "no_manager_found.txt",
        NotificationKind::Arrival => "arrival.txt",
    }
}

fn subject_for(kind: NotificationKind, event: &NotificationEvent) -> String {
    let requisition_id = &event.requisition().id.0;
    match kind {
        NotificationKind::RequisitionCreated => {
            format!("Requisition {requisition_id} submitted")
        }
        NotificationKind::RequisitionPending => {
            format!("Requisition {requisition_id} awaits your approval")
        }
        NotificationKind::RequisitionApproved => {
            format!("Requisition {requisition_id} approved")
        }
        NotificationKind::RequisitionRejected => {
            format!("Requisition {requisition_id} rejected")
        }
        NotificationKind::NoManagerFound => {
            format!("No manager found for requisition {requisition_id}")
        }
        NotificationKind::Arrival => format!("Requisition {requisition_id} has arrived"),
    }
}

fn context_for(event: &NotificationEvent) -> Context {
    let requisition = event.requisition();

    let mut context = Context::new();
    context.insert("requisition_id", &requisition.id.0);
    context.insert("requester_id", &requisition.requester_id.0);
    context.insert("requester_name", &requisition.requester_name);
    context.insert("cost_center", &requisition.cost_center.0);
    context.insert("total_amount", &requisition.total_amount);
    context.insert("note", &requisition.note);
    context.insert("submitted_at", &format_timestamp(&requisition.submitted_at));
    context.insert("lines", &requisition.lines);

    match event {
        NotificationEvent::Created { .. } => {}
        NotificationEvent::Approved { actor, decided_at, is_self_approval, .. } => {
            context.insert("actor_name", &actor.display_name);
            context.insert("decided_at", &format_timestamp(decided_at));
            context.insert("is_self_approval", is_self_approval);
        }
        NotificationEvent::Rejected { actor, reason, decided_at, .. } => {
            context.insert("actor_name", &actor.display_name);
            context.insert("decided_at", &format_timestamp(decided_at));
            context.insert("reason", reason);
        }
        NotificationEvent::Arrival { closed_at, .. } => {
            context.insert("closed_at", &format_timestamp(closed_at));
        }
    }

    context
}

fn format_timestamp(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use reqflow_core::domain::notification::{
        Actor, LineDigest, NotificationEvent, NotificationKind, RequisitionDigest,
    };
    use reqflow_core::domain::org::{CostCenter, EmployeeId};
    use reqflow_core::domain::requisition::RequisitionId;

    use super::TemplateRenderer;

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn digest(lines: Vec<LineDigest>) -> RequisitionDigest {
        RequisitionDigest {
            id: RequisitionId("R-100".to_string()),
            requester_id: EmployeeId("U1".to_string()),
            requester_name: "Riley Park".to_string(),
            cost_center: CostCenter("CC1".to_string()),
            total_amount: Decimal::new(4500, 2),
            note: Some("quarterly restock".to_string()),
            submitted_at: parse_ts("2026-03-02T09:30:00Z"),
            lines,
        }
    }

    fn line() -> LineDigest {
        LineDigest {
            product_ref: "paper-a4".to_string(),
            quantity: 10,
            unit_price: Decimal::new(450, 2),
            line_total: Decimal::new(4500, 2),
        }
    }

    #[test]
    fn rendering_is_deterministic_for_identical_payloads() {
        let renderer = TemplateRenderer::new();
        let event = NotificationEvent::Created { requisition: digest(vec![line()]) };

        let first = renderer.render(NotificationKind::RequisitionCreated, &event);
        let second = renderer.render(NotificationKind::RequisitionCreated, &event);

        assert_eq!(first, second);
    }

    #[test]
    fn created_body_embeds_payload_timestamp_and_items_table() {
        let renderer = TemplateRenderer::new();
        let event = NotificationEvent::Created { requisition: digest(vec![line()]) };

        let rendered = renderer.render(NotificationKind::RequisitionCreated, &event);

        assert_eq!(rendered.subject, "Requisition R-100 submitted");
        assert!(rendered.body.contains("2026-03-02 09:30 UTC"));
        assert!(rendered.body.contains("paper-a4"));
        assert!(rendered.body.contains("4.50"));
        assert!(rendered.body.contains("45.00"));
    }

    #[test]
    fn absent_line_items_render_without_a_table_and_without_error() {
        let renderer = TemplateRenderer::new();
        let event = NotificationEvent::Created { requisition: digest(Vec::new()) };

        let rendered = renderer.render(NotificationKind::RequisitionCreated, &event);

        assert!(!rendered.body.contains("Items:"));
        assert!(rendered.body.contains("Total: 45.00"));
    }

    #[test]
    fn rejected_body_contains_the_reason_text() {
        let renderer = TemplateRenderer::new();
        let event = NotificationEvent::Rejected {
            requisition: digest(vec![line()]),
            actor: Actor { id: EmployeeId("M1".to_string()), display_name: "Ana Souza".to_string() },
            reason: "budget exceeded".to_string(),
            decided_at: parse_ts("2026-03-02T11:00:00Z"),
        };

        let rendered = renderer.render(NotificationKind::RequisitionRejected, &event);

        assert!(rendered.body.contains("budget exceeded"));
        assert!(rendered.body.contains("Ana Souza"));
    }

    #[test]
    fn self_approval_is_called_out_in_the_approved_body() {
        let renderer = TemplateRenderer::new();
        let event = NotificationEvent::Approved {
            requisition: digest(vec![line()]),
            actor: Actor { id: EmployeeId("M1".to_string()), display_name: "Ana Souza".to_string() },
            decided_at: parse_ts("2026-03-02T11:00:00Z"),
            is_self_approval: true,
        };

        let rendered = renderer.render(NotificationKind::RequisitionApproved, &event);

        assert!(rendered.body.contains("self-approval"));
    }

    #[test]
    fn mismatched_kind_falls_back_to_generic_body_instead_of_failing() {
        let renderer = TemplateRenderer::new();
        // An approved-kind render against a created event is missing the
        // actor fields its template needs.
        let event = NotificationEvent::Created { requisition: digest(vec![line()]) };

        let rendered = renderer.render(NotificationKind::RequisitionApproved, &event);

        assert_eq!(rendered.subject, "Requisition R-100 approved");
        assert!(rendered.body.contains("There is an update on requisition R-100"));
    }
}
