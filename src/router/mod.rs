pub mod login;
pub mod metrics;

#[cfg(test)]
pub(crate) fn state(
    config: crate::config::DirectoryConfig,
    directory: crate::ldap::testing::FakeDirectory,
    users: std::sync::Arc<crate::user::memory::MemoryUserRepository>,
) -> crate::AppState {
    use std::sync::Arc;

    use crate::clock::{Clock, FixedClock};
    use crate::config::Configuration;
    use crate::ldap::DirectoryValidator;
    use crate::login::{LocalPasswordLogin, LoginService};

    let directory_config = Arc::new(config.clone());
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_700_000_000));
    let validator = Arc::new(DirectoryValidator::with_connector(
        Arc::clone(&directory_config),
        Box::new(directory),
    ));
    let primary = Arc::new(LocalPasswordLogin::new(users.clone(), Arc::clone(&clock)));

    let mut configuration = Configuration::default();
    configuration.index = "/desks".into();
    configuration.ldap = Some(config);

    let sessions = crate::session::SessionStore::new(
        configuration.session_lifetime(),
        Arc::clone(&clock),
    );

    crate::AppState {
        config: Arc::new(configuration),
        login: Arc::new(LoginService::new(directory_config, validator, users, primary, clock)),
        sessions,
        metrics: None,
    }
}
