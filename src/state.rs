use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::VehicleConfig;
use crate::drivetrain::{DriverCommand, InputState, InputSurface};
use crate::physics::{DEFAULT_SPAWN, PhysicsWorld};
use crate::vehicle::VehicleState;

/// Lateral gap between spawned vehicles (m).
const SPAWN_SPACING: f32 = 5.0;

/// A connected player. Network writes land in `input`; the fixed tick
/// hands it to the vehicle once per tick.
pub struct Entity {
    pub id: String,
    pub input: InputState,
}

#[derive(Serialize)]
pub struct VehicleSnapshot<'a> {
    pub id: &'a str,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub state: &'a VehicleState,
}

#[derive(Serialize)]
pub struct Snapshot<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tick: u64,
    pub vehicles: Vec<VehicleSnapshot<'a>>,
}

pub struct SharedGameState {
    pub tick: u64,
    pub clients: HashMap<String, UnboundedSender<String>>,
    pub entities: HashMap<String, Entity>,
    vehicle_config: VehicleConfig,
    spawned: usize,
}

impl SharedGameState {
    pub fn new(vehicle_config: VehicleConfig) -> Self {
        Self {
            tick: 0,
            clients: HashMap::new(),
            entities: HashMap::new(),
            vehicle_config,
            spawned: 0,
        }
    }

    /// Registers a player and spawns its vehicle. Returns the player id.
    pub fn add_entity(&mut self, phys: &mut PhysicsWorld) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        let x = SPAWN_SPACING * self.spawned as f32;
        let [_, y, z] = DEFAULT_SPAWN;
        phys.spawn_vehicle(&id, self.vehicle_config.clone(), [x, y, z])?;
        self.spawned += 1;
        self.entities.insert(id.clone(), Entity { id: id.clone(), input: InputState::default() });
        Ok(id)
    }

    pub fn remove_entity(&mut self, id: &str, phys: &mut PhysicsWorld) {
        self.entities.remove(id);
        self.clients.remove(id);
        phys.remove_vehicle(id);
    }

    pub fn register_client(&mut self, id: &str, tx: UnboundedSender<String>) {
        self.clients.insert(id.to_string(), tx);
    }

    pub fn update_input(&mut self, id: &str, input: InputSurface) {
        if let Some(e) = self.entities.get_mut(id) {
            e.input.set_player(input);
        }
    }

    pub fn set_override(&mut self, id: &str, input: Option<InputSurface>) {
        let Some(e) = self.entities.get_mut(id) else { return };
        match input {
            Some(i) => e.input.set_override(i),
            None => e.input.release_override(),
        }
    }

    pub fn push_command(&mut self, id: &str, cmd: DriverCommand) {
        if let Some(e) = self.entities.get_mut(id) {
            debug!(player = id, ?cmd, "queued command");
            e.input.push_command(cmd);
        }
    }

    /// Copies each entity's input snapshot into its vehicle. Called once per
    /// fixed tick, before the physics step.
    pub fn sync_inputs(&mut self, phys: &mut PhysicsWorld) {
        for entity in self.entities.values_mut() {
            if let Some(vehicle) = phys.vehicle_mut(&entity.id) {
                entity.input.transfer_to(vehicle.input_mut());
            }
        }
    }

    pub fn snapshot<'a>(&self, phys: &'a PhysicsWorld) -> Snapshot<'a> {
        let vehicles = phys
            .vehicles()
            .filter_map(|(id, vb)| {
                let (position, rotation) = phys.pose(id)?;
                Some(VehicleSnapshot { id, position, rotation, state: vb.vehicle.state() })
            })
            .collect();
        Snapshot { kind: "snapshot", tick: self.tick, vehicles }
    }

    /// Build and send a snapshot of all vehicles to all clients.
    pub fn broadcast_snapshot(&self, phys: &PhysicsWorld) {
        if self.clients.is_empty() {
            return;
        }
        let json = match serde_json::to_string(&self.snapshot(phys)) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "snapshot serialization failed");
                return;
            }
        };
        for tx in self.clients.values() {
            let _ = tx.send(json.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_lifecycle_tracks_physics() {
        let mut phys = PhysicsWorld::new();
        let mut game = SharedGameState::new(VehicleConfig::gt86());

        let a = game.add_entity(&mut phys).unwrap();
        let b = game.add_entity(&mut phys).unwrap();
        assert_ne!(a, b);
        assert_eq!(phys.vehicles().count(), 2);

        game.remove_entity(&a, &mut phys);
        assert!(phys.vehicle(&a).is_none());
        assert!(phys.vehicle(&b).is_some());
    }

    #[test]
    fn inputs_reach_the_vehicle_on_sync() {
        let mut phys = PhysicsWorld::new();
        let mut game = SharedGameState::new(VehicleConfig::gt86());
        let id = game.add_entity(&mut phys).unwrap();

        game.update_input(&id, InputSurface { throttle: 0.7, ..InputSurface::default() });
        game.set_override(&id, Some(InputSurface { brake: 1.0, ..InputSurface::default() }));
        game.sync_inputs(&mut phys);

        let input = phys.vehicle_mut(&id).unwrap().input_mut();
        assert_eq!(input.player().throttle, 0.7);
        assert!(input.is_overridden());

        game.set_override(&id, None);
        game.sync_inputs(&mut phys);
        assert!(!phys.vehicle_mut(&id).unwrap().input_mut().is_overridden());
    }

    #[test]
    fn snapshot_serializes_every_vehicle() {
        let mut phys = PhysicsWorld::new();
        let mut game = SharedGameState::new(VehicleConfig::gt86());
        let id = game.add_entity(&mut phys).unwrap();
        phys.step(1.0 / 60.0);
        game.tick = 1;

        let json = serde_json::to_value(game.snapshot(&phys)).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["tick"], 1);
        assert_eq!(json["vehicles"][0]["id"], id.as_str());
        assert!(json["vehicles"][0]["state"]["engine_rpm"].is_number());
    }
}
