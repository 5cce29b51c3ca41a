use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use shared_models::AppError;

use crate::models::{Appointment, AppointmentStatus};

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AppError> {
        info!(recipient, subject, "Notification: {}", body);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl StatusNotification {
    /// Only confirmations and cancellations reach clients that left an email.
    pub fn for_status(appointment: &Appointment) -> Option<Self> {
        let recipient = appointment
            .client_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())?;

        let when = appointment.date_time.format("%d/%m/%Y %H:%M");
        let service = if appointment.service_name.is_empty() {
            appointment.service.as_str()
        } else {
            appointment.service_name.as_str()
        };

        let (subject, body) = match appointment.status {
            AppointmentStatus::Confirmed => (
                "Appointment confirmed".to_string(),
                format!("Hi {}, your {} on {} is confirmed.", appointment.client_name, service, when),
            ),
            AppointmentStatus::Canceled => (
                "Appointment canceled".to_string(),
                format!("Hi {}, your {} on {} was canceled.", appointment.client_name, service, when),
            ),
            _ => return None,
        };

        Some(Self {
            recipient: recipient.to_string(),
            subject,
            body,
        })
    }
}

/// Fire and forget: delivery failures are logged, never returned.
pub fn dispatch(sender: Arc<dyn NotificationSender>, notification: StatusNotification) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sender
            .send(&notification.recipient, &notification.subject, &notification.body)
            .await
        {
            warn!("Failed to notify {}: {}", notification.recipient, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingSource, PaymentStatus};
    use availability_cell::Modality;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FailingSender {
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl NotificationSender for FailingSender {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), AppError> {
            *self.attempts.lock().unwrap() += 1;
            Err(AppError::ExternalService("smtp down".to_string()))
        }
    }

    fn appointment(status: AppointmentStatus, email: Option<&str>) -> Appointment {
        Appointment {
            id: "apt-1".to_string(),
            client_name: "Ana".to_string(),
            client_email: email.map(str::to_string),
            client_phone: None,
            service: "massage".to_string(),
            service_name: "Massage".to_string(),
            date_time: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            duration: 60,
            status,
            modality: Modality::InPerson,
            price: 100.0,
            payment_status: PaymentStatus::Pending,
            hold_expires_at: None,
            source: BookingSource::PublicPage,
        }
    }

    #[test]
    fn confirmation_mentions_service_and_time() {
        let notification =
            StatusNotification::for_status(&appointment(AppointmentStatus::Confirmed, Some("ana@example.com")))
                .unwrap();
        assert_eq!(notification.recipient, "ana@example.com");
        assert!(notification.body.contains("Massage"));
        assert!(notification.body.contains("02/01/2024 09:00"));
    }

    #[test]
    fn no_notification_without_email_or_for_other_statuses() {
        assert!(StatusNotification::for_status(&appointment(AppointmentStatus::Confirmed, None)).is_none());
        assert!(StatusNotification::for_status(&appointment(AppointmentStatus::Canceled, Some("  "))).is_none());
        assert!(
            StatusNotification::for_status(&appointment(AppointmentStatus::Finished, Some("ana@example.com")))
                .is_none()
        );
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() {
        let sender = Arc::new(FailingSender::default());
        let notification =
            StatusNotification::for_status(&appointment(AppointmentStatus::Canceled, Some("ana@example.com")))
                .unwrap();

        dispatch(sender.clone(), notification).await.unwrap();
        assert_eq!(*sender.attempts.lock().unwrap(), 1);
    }
}
