//! Database drivers.
//!
//! The store only talks to [`Connection`](crate::traits::Connection) and
//! [`ConnectionProvider`](crate::traits::ConnectionProvider). The sea-orm driver is what the store builds by itself
//! out of a configured connection URL; backends are enabled with the `sqlite`, `pg` and `mysql` features.
pub mod seaorm;

pub use seaorm::SeaOrmConnection;
pub use seaorm::SeaOrmProvider;

/// Add `user[:password]@` to a URL which carries no credentials of its own.
pub fn url_with_credentials(url: &str, user: Option<&str>, password: Option<&str>) -> String {
    let Some(user) = user.filter(|u| !u.is_empty())
    else {
        return url.to_string();
    };

    match url.split_once("://") {
        Some((scheme, rest)) if !rest.contains('@') => {
            let credentials = match password {
                Some(password) => format!("{user}:{password}"),
                None => user.to_string(),
            };
            format!("{scheme}://{credentials}@{rest}")
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_spliced_once() {
        assert_eq!(
            url_with_credentials("postgres://db:5432/cache", Some("sa"), Some("pw")),
            "postgres://sa:pw@db:5432/cache"
        );
        assert_eq!(
            url_with_credentials("postgres://db/cache", Some("sa"), None),
            "postgres://sa@db/cache"
        );
        assert_eq!(
            url_with_credentials("postgres://me@db/cache", Some("sa"), Some("pw")),
            "postgres://me@db/cache"
        );
        assert_eq!(
            url_with_credentials("sqlite://cache.db", None, Some("pw")),
            "sqlite://cache.db"
        );
    }
}
