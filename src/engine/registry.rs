use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn validate_profile(profile: &RoomProfile) -> Result<(), EngineError> {
    if profile.name.trim().is_empty() {
        return Err(EngineError::LimitExceeded("room name must not be empty"));
    }
    if profile.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if profile.capacity == 0 {
        return Err(EngineError::LimitExceeded("room capacity must be positive"));
    }
    if profile
        .description
        .as_ref()
        .is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN)
    {
        return Err(EngineError::LimitExceeded("room description too long"));
    }
    if profile.equipment.len() > MAX_EQUIPMENT_ITEMS {
        return Err(EngineError::LimitExceeded("too many equipment items"));
    }
    Ok(())
}

fn validate_user(user: &UserInfo) -> Result<(), EngineError> {
    if user.name.trim().is_empty() || user.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("user name empty or too long"));
    }
    if user.email.len() > MAX_EMAIL_LEN || !user.email.contains('@') {
        return Err(EngineError::LimitExceeded("malformed email address"));
    }
    if user.department.as_ref().is_some_and(|d| d.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("department name too long"));
    }
    Ok(())
}

impl Engine {
    // ── Administrative writes ────────────────────────────────

    pub async fn create_room(&self, id: Ulid, profile: RoomProfile) -> Result<(), EngineError> {
        validate_profile(&profile)?;
        let _registry = self.registry.lock().await;
        if self.state.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated {
            id,
            profile: profile.clone(),
        };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(RoomState::new(id, profile))));
        info!("room {id} created");
        Ok(())
    }

    /// Replace a room's profile (rename, capacity, rate, equipment, activate/deactivate).
    /// Existing reservations are not re-validated against the new capacity.
    pub async fn update_room(&self, id: Ulid, profile: RoomProfile) -> Result<(), EngineError> {
        validate_profile(&profile)?;
        let rs = self
            .get_room_state(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::RoomUpdated { id, profile };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("room {id} updated (active: {})", guard.profile.active);
        Ok(())
    }

    pub async fn register_user(&self, user: UserInfo) -> Result<(), EngineError> {
        validate_user(&user)?;
        let _registry = self.registry.lock().await;
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.users.contains_key(&user.id) {
            return Err(EngineError::AlreadyExists(user.id));
        }
        if self.emails.contains_key(&user.email.to_lowercase()) {
            return Err(EngineError::DuplicateEmail(user.email));
        }

        let event = Event::UserRegistered { user: user.clone() };
        self.wal_append(&event).await?;
        info!("user {} registered", user.id);
        self.insert_user(user);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────

    pub async fn get_room(&self, id: Ulid) -> Option<RoomInfo> {
        let rs = self.get_room_state(&id)?;
        let guard = rs.read().await;
        Some(guard.info())
    }

    /// Active rooms passing the filter, ordered by name.
    pub async fn list_active_rooms(&self, filter: &RoomFilter) -> Vec<RoomInfo> {
        let mut rooms = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            if guard.profile.active && filter.matches(&guard.profile) {
                rooms.push(guard.info());
            }
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }

    pub fn get_user(&self, id: &Ulid) -> Option<UserInfo> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn user_exists(&self, id: &Ulid) -> bool {
        self.users.contains_key(id)
    }

    /// All users, ordered by name.
    pub fn list_users(&self) -> Vec<UserInfo> {
        let mut users: Vec<UserInfo> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        users
    }
}
