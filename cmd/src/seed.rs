use nanoid::nanoid;
use tracing::{debug, info};

use abi::errors::{Error, ErrorKind, Result};
use abi::types::{NewUser, User};
use db::{DbRepo, UserRepo};

const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];

// draws per requested user before giving up on finding a free name
const MAX_DRAWS_PER_USER: usize = 16;

/// create `total` dummy accounts named `user_<digits>`
pub async fn seed(repo: &DbRepo, total: usize) -> Result<Vec<User>> {
    seed_with(repo, total, || format!("user_{}", nanoid!(6, &DIGITS))).await
}

async fn seed_with(
    repo: &DbRepo,
    total: usize,
    mut next_name: impl FnMut() -> String,
) -> Result<Vec<User>> {
    let mut users = Vec::with_capacity(total);
    let mut draws = 0;
    while users.len() < total {
        if draws == total * MAX_DRAWS_PER_USER {
            return Err(Error::storage(format!(
                "no free username after {draws} draws, {} of {total} users created",
                users.len()
            )));
        }
        draws += 1;

        let username = next_name();
        let email = format!("{username}@example.com");
        match repo.user.create_user(NewUser::new(username, email)).await {
            Ok(user) => {
                debug!("seeded user {}", user.id);
                users.push(user);
            }
            Err(e) if e.kind() == ErrorKind::UsernameTaken => {
                debug!("username taken, drawing again: {e}");
            }
            Err(e) => return Err(e),
        }
    }
    info!("{total} dummy users created");
    Ok(users)
}
