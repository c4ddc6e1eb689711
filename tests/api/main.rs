mod admin_notifications;
mod admin_queue;
mod health_check;
mod helpers;
mod subscriptions;
