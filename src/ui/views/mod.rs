mod board;
mod login;
mod notifications;
mod projects;
mod task_detail;

pub use board::BoardView;
pub use login::LoginView;
pub use notifications::NotificationsView;
pub use projects::ProjectsView;
pub use task_detail::TaskDetailView;
