// ==============================================================================
// physics.rs - RAPIER HOST FOR THE DRIVETRAIN CORE
// ------------------------------------------------------------------------------
// Owns the rigid-body world and one chassis body per vehicle. Each fixed tick:
//
//   1) raycast suspension per wheel (suspension_contact.rs) -> WheelContact
//   2) suspension impulse at each contact point
//   3) Vehicle::step(chassis, contacts, dt) -> tire / anti-roll impulses
//   4) impulses applied at their points (None => COM), bounded linvel fix
//   5) pipeline step, then reset any body that left the sane region
//
// Ground colliders carry their material index in `user_data`.
// ==============================================================================

use nalgebra::UnitQuaternion;
use rapier3d::prelude::*;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::VehicleConfig;
use crate::drivetrain::types::{ChassisState, Impulse, WheelContact};
use crate::error::ConfigError;
use crate::suspension_contact::{WheelGeometry, build_wheel_contact, v3};
use crate::vehicle::Vehicle;

const GROUP_GROUND: Group = Group::from_bits_truncate(0b0001);
const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

/// Bodies beyond this distance (or non-finite) are put back at their spawn.
const RESET_LIMIT: f32 = 1_000.0;

pub const DEFAULT_SPAWN: [f32; 3] = [0.0, 1.2, 0.0];

/// A simulated vehicle and the chassis body it drives.
pub struct VehicleBody {
    pub body: RigidBodyHandle,
    pub vehicle: Vehicle,
    spawn: [f32; 3],
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline,
    vehicles: HashMap<String, VehicleBody>, // playerId -> vehicle
    surface_materials: Vec<usize>,          // ground slab first
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn to_vector(v: [f32; 3]) -> Vector<Real> {
    vector![v[0], v[1], v[2]]
}

/// Chassis kinematics in world space. +Z forward, +Y up, +X left.
pub fn chassis_state(body: &RigidBody) -> ChassisState {
    let rot = body.position().rotation;
    ChassisState {
        linvel: v3(*body.linvel()),
        angvel: v3(*body.angvel()),
        forward: v3(rot * vector![0.0, 0.0, 1.0]),
        up: v3(rot * vector![0.0, 1.0, 0.0]),
        right: v3(rot * vector![-1.0, 0.0, 0.0]),
        mass: body.mass(),
    }
}

fn apply_impulse(body: &mut RigidBody, imp: &Impulse) {
    let impulse = to_vector(imp.impulse);
    if !(impulse.x.is_finite() && impulse.y.is_finite() && impulse.z.is_finite()) {
        return;
    }
    match imp.at_point {
        Some([x, y, z]) => body.apply_impulse_at_point(impulse, point![x, y, z], true),
        None => body.apply_impulse(impulse, true),
    }
}

impl PhysicsWorld {
    pub fn new() -> Self {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        // Large static slab, top surface at y = 0, material 0.
        let ground_rb = RigidBodyBuilder::fixed().translation(vector![0.0, -1.0, 0.0]).build();
        let ground_handle = bodies.insert(ground_rb);
        let ground_collider = ColliderBuilder::cuboid(500.0, 1.0, 500.0)
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.2)
            .restitution(0.0)
            .user_data(0)
            .build();
        colliders.insert_with_parent(ground_collider, ground_handle, &mut bodies);

        info!(bodies = bodies.len(), colliders = colliders.len(), "ground inserted");

        Self {
            gravity: vector![0.0, -9.81, 0.0],
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            vehicles: HashMap::new(),
            surface_materials: vec![0],
        }
    }

    /// Thin patch of another ground material laid on top of the slab.
    /// `center` and `half_extents` are in the XZ plane. Every spawned
    /// vehicle must know `material`.
    pub fn add_surface(
        &mut self,
        material: usize,
        center: [f32; 2],
        half_extents: [f32; 2],
    ) -> Result<ColliderHandle, ConfigError> {
        for vb in self.vehicles.values() {
            vb.vehicle.config().material(material)?;
        }
        let collider = ColliderBuilder::cuboid(half_extents[0], 0.01, half_extents[1])
            .translation(vector![center[0], 0.0, center[1]])
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.2)
            .user_data(material as u128)
            .build();
        self.surface_materials.push(material);
        Ok(self.colliders.insert(collider))
    }

    /// Builds the vehicle, then its chassis body. An existing vehicle under
    /// `id` is replaced.
    pub fn spawn_vehicle(&mut self, id: &str, cfg: VehicleConfig, position: [f32; 3]) -> Result<RigidBodyHandle, ConfigError> {
        let vehicle = Vehicle::new(cfg)?;
        for &material in &self.surface_materials {
            if let Err(e) = vehicle.config().material(material) {
                warn!(player = id, error = %e, "vehicle does not know a ground material");
                return Err(e);
            }
        }
        self.remove_vehicle(id);

        let chassis = &vehicle.config().chassis;
        let [hx, hy, hz] = chassis.half_extents;
        let [cx, cy, cz] = chassis.com_offset;
        let volume = 8.0 * hx * hy * hz;
        let density = chassis.mass / volume.max(1e-3);

        let rb = RigidBodyBuilder::dynamic()
            .translation(to_vector(position))
            .linear_damping(chassis.linear_damping)
            .angular_damping(chassis.angular_damping)
            .ccd_enabled(true)
            .build();

        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .translation(vector![cx, cy, cz])
            .collision_groups(InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND))
            .active_events(ActiveEvents::empty())
            .density(density)
            .friction(0.0)
            .restitution(0.0)
            .build();

        let handle = self.bodies.insert(rb);
        self.colliders.insert_with_parent(collider, handle, &mut self.bodies);

        info!(player = id, vehicle = %vehicle.config().name, ?position, "spawned vehicle");
        self.vehicles.insert(id.to_string(), VehicleBody { body: handle, vehicle, spawn: position });
        Ok(handle)
    }

    pub fn remove_vehicle(&mut self, id: &str) -> bool {
        let Some(vb) = self.vehicles.remove(id) else { return false };
        self.bodies.remove(
            vb.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
        info!(player = id, "removed vehicle");
        true
    }

    pub fn vehicle(&self, id: &str) -> Option<&Vehicle> {
        self.vehicles.get(id).map(|vb| &vb.vehicle)
    }

    pub fn vehicle_mut(&mut self, id: &str) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(id).map(|vb| &mut vb.vehicle)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = (&str, &VehicleBody)> {
        self.vehicles.iter().map(|(id, vb)| (id.as_str(), vb))
    }

    /// World translation and rotation quaternion `[i, j, k, w]` of a vehicle's chassis.
    pub fn pose(&self, id: &str) -> Option<([f32; 3], [f32; 4])> {
        let vb = self.vehicles.get(id)?;
        let iso = self.bodies.get(vb.body)?.position();
        let t = iso.translation.vector;
        let r = iso.rotation;
        Some(([t.x, t.y, t.z], [r.i, r.j, r.k, r.w]))
    }

    /// Suspension + drivetrain for every vehicle. Runs before the pipeline step.
    fn apply_vehicles(&mut self, dt: Real) {
        self.query_pipeline.update(&self.colliders);

        for vb in self.vehicles.values_mut() {
            let Some(body) = self.bodies.get(vb.body) else { continue };
            let chassis = chassis_state(body);

            let contacts: Vec<WheelContact> = vb
                .vehicle
                .axles()
                .iter()
                .flat_map(|a| a.wheels().iter())
                .map(|w| {
                    let geometry = WheelGeometry {
                        cfg: w.config(),
                        radius: w.effective_radius(),
                        stiffness_multiplier: w.stiffness_multiplier(),
                    };
                    build_wheel_contact(geometry, body, vb.body, &self.query_pipeline, &self.bodies, &self.colliders)
                })
                .collect();

            let tick = vb.vehicle.step(&chassis, &contacts, dt);

            let Some(body) = self.bodies.get_mut(vb.body) else { continue };
            for c in contacts.iter().filter(|c| c.grounded) {
                let [nx, ny, nz] = c.normal;
                let f = c.normal_force * dt;
                apply_impulse(body, &Impulse { impulse: [nx * f, ny * f, nz * f], at_point: Some(c.point) });
            }
            for imp in &tick.impulses {
                apply_impulse(body, imp);
            }
            if let Some(v) = tick.linvel_correction {
                body.set_linvel(to_vector(v), true);
            }
        }
    }

    /// Puts bodies that blew up back at their spawn point, at rest.
    fn reset_exploded(&mut self) {
        for (id, vb) in self.vehicles.iter_mut() {
            let Some(body) = self.bodies.get_mut(vb.body) else { continue };
            let pos = *body.translation();
            let bad = !(pos.x.is_finite() && pos.y.is_finite() && pos.z.is_finite())
                || pos.x.abs() > RESET_LIMIT
                || pos.y.abs() > RESET_LIMIT
                || pos.z.abs() > RESET_LIMIT;
            if !bad {
                continue;
            }

            body.set_translation(to_vector(vb.spawn), true);
            body.set_rotation(UnitQuaternion::identity(), true);
            body.set_linvel(Vector::zeros(), true);
            body.set_angvel(Vector::zeros(), true);
            vb.vehicle.reset();
            warn!(player = %id, spawn = ?vb.spawn, "reset exploding body");
        }
    }

    pub fn step(&mut self, dt: Real) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }

        self.apply_vehicles(dt);

        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters { dt, ..IntegrationParameters::default() },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );

        self.reset_exploded();
    }
}
