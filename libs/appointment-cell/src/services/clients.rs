use chrono::NaiveDateTime;
use tracing::debug;

use crate::models::{Appointment, Client, ClientCategory};

pub const FIEL_MIN_APPOINTMENTS: u32 = 5;
pub const VIP_MIN_APPOINTMENTS: u32 = 10;
pub const VIP_MIN_SPENT: f64 = 2000.0;

/// Clients are matched by name; the id is the normalised name.
pub fn client_id(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

pub fn categorize(total_appointments: u32, total_spent: f64) -> ClientCategory {
    if total_appointments >= VIP_MIN_APPOINTMENTS && total_spent >= VIP_MIN_SPENT {
        ClientCategory::Vip
    } else if total_appointments >= FIEL_MIN_APPOINTMENTS {
        ClientCategory::Fiel
    } else {
        ClientCategory::New
    }
}

/// Fold one confirmed or finished appointment into the client's aggregate.
///
/// Totals only move when `finished`, and each appointment is counted at
/// most once, so replaying the same visit leaves the aggregate unchanged.
pub fn record_visit(existing: Option<Client>, appointment: &Appointment, finished: bool) -> Client {
    let mut client = existing.unwrap_or_else(|| Client {
        id: client_id(&appointment.client_name),
        name: appointment.client_name.trim().to_string(),
        email: None,
        phone: None,
        total_spent: 0.0,
        avg_ticket: 0.0,
        total_appointments: 0,
        last_visit: None,
        category: ClientCategory::New,
        tags: Vec::new(),
        counted_appointments: Vec::new(),
    });

    if client.email.is_none() {
        client.email = appointment.client_email.clone();
    }
    if client.phone.is_none() {
        client.phone = appointment.client_phone.clone();
    }

    client.last_visit = Some(latest(client.last_visit, appointment.date_time));

    let tag = if appointment.service_name.is_empty() {
        &appointment.service
    } else {
        &appointment.service_name
    };
    if !client.tags.iter().any(|t| t == tag) {
        client.tags.push(tag.clone());
    }

    if finished && !client.counted_appointments.contains(&appointment.id) {
        client.counted_appointments.push(appointment.id.clone());
        client.total_appointments += 1;
        client.total_spent += appointment.price;
        client.avg_ticket = client.total_spent / f64::from(client.total_appointments);
        client.category = categorize(client.total_appointments, client.total_spent);
        debug!(
            "Client {} now has {} appointments ({:.2} spent)",
            client.id, client.total_appointments, client.total_spent
        );
    }

    client
}

fn latest(current: Option<NaiveDateTime>, candidate: NaiveDateTime) -> NaiveDateTime {
    current.map_or(candidate, |c| c.max(candidate))
}
