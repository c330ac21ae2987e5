// demos/hover.rs

//! Runs the flight core against a simulated board: a virtual clock, a stick
//! script on the receiver, a toy rigid body for the gyro and a logging
//! telemetry link. The script arms, flies a short roll input, centres the
//! sticks, then cuts the radio to show the failsafe disarm.

use free_flight_core::clock::{Clock, JumpToTarget, SampleSignal, VirtualClock};
use free_flight_core::flight::TelemetrySnapshot;
use free_flight_core::receiver::{channel, ChannelSource, FrameStatus, RawFrame, CHANNEL_COUNT};
use free_flight_core::{
    AttitudeSource, Board, Demands, FlightConfig, FlightCore, MotorSink, TelemetryLink,
};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

const CYCLES_PER_SECOND: u32 = 480_000_000;
const FRAME_PERIOD_US: u32 = 20_000;
const STEP_US: u32 = 25;
/// Angular acceleration per unit of mixer input, degrees per second squared.
const TORQUE_GAIN: f32 = 4000.0;

struct SimRx<'a> {
    clock: &'a VirtualClock,
    channels: [u16; CHANNEL_COUNT],
    next_frame_us: u32,
    silent: bool,
}

impl ChannelSource for SimRx<'_> {
    fn check(&mut self, frame: &mut RawFrame) -> FrameStatus {
        let now_us = self.clock.micros();
        if self.silent || now_us < self.next_frame_us {
            return FrameStatus::PENDING;
        }
        self.next_frame_us = now_us + FRAME_PERIOD_US;
        frame.channels = self.channels;
        frame.timestamp_us = now_us;
        FrameStatus::COMPLETE
    }
}

#[derive(Default)]
struct SimBody {
    rates: [f32; 3],
    angles: [f32; 3],
    last_update_us: u32,
    gyro_scale: f32,
}

impl SimBody {
    fn apply(&mut self, demands: Demands, dt: f32) {
        self.rates[0] += demands.roll * TORQUE_GAIN * dt;
        self.rates[1] += demands.pitch * TORQUE_GAIN * dt;
        self.rates[2] -= demands.yaw * TORQUE_GAIN * dt;
    }
}

impl AttitudeSource for SimBody {
    fn gyro_raw(&mut self) -> [i16; 3] {
        self.rates.map(|rate| (rate / self.gyro_scale) as i16)
    }

    fn update_attitude(&mut self, now_us: u32, rates: [f32; 3]) {
        let dt = now_us.wrapping_sub(self.last_update_us) as f32 * 1e-6;
        self.last_update_us = now_us;
        for (angle, rate) in self.angles.iter_mut().zip(rates) {
            *angle += rate * dt;
        }
    }

    fn update_accelerometer(&mut self, _now_us: u32) {}

    fn angles(&self) -> [f32; 3] {
        self.angles
    }
}

#[derive(Default)]
struct SimMotors {
    writes: u64,
}

impl MotorSink for SimMotors {
    fn write(&mut self, _outputs: &[f32]) {
        self.writes += 1;
    }
}

#[derive(Default)]
struct LogTelemetry {
    runs: u32,
}

impl TelemetryLink for LogTelemetry {
    fn run(&mut self, snapshot: &TelemetrySnapshot) {
        self.runs += 1;
        if self.runs % 50 == 0 {
            log::info!(
                "{:?} {:?} roll {:.1} deg motors {:.3?}",
                snapshot.arming,
                snapshot.failsafe_phase,
                snapshot.state.phi / 10.0,
                &snapshot.motors[..snapshot.motor_count]
            );
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let clock = VirtualClock::new(CYCLES_PER_SECOND);
    let signal = SampleSignal::new();

    let mut config = FlightConfig::new();
    config.motors.airmode = true;

    let mut channels = [1500; CHANNEL_COUNT];
    channels[channel::THROTTLE] = 1000;
    channels[channel::AUX1] = 1000;
    channels[channel::AUX2] = 1000;

    let board = Board {
        clock: &clock,
        spin: JumpToTarget,
        rx: SimRx {
            clock: &clock,
            channels,
            next_frame_us: 0,
            silent: false,
        },
        attitude: SimBody {
            gyro_scale: config.gyro.scale,
            ..SimBody::default()
        },
        motors: SimMotors::default(),
        telemetry: LogTelemetry::default(),
        sample_signal: &signal,
    };

    let dt = config.scheduler.core_dt();
    let mut core = FlightCore::new(config, board)?;

    let mut next_sample_us = 0;
    while clock.millis() < 9_000 {
        clock.advance_micros(STEP_US);

        let now_us = clock.micros();
        if now_us >= next_sample_us {
            signal.signal(clock.cycles());
            next_sample_us = now_us + 125;
        }

        let rx = &mut core.board_mut().rx;
        match now_us / 1000 {
            3_000 => rx.channels[channel::AUX1] = 2000,
            3_500 => rx.channels[channel::THROTTLE] = 1400,
            4_000 => rx.channels[channel::ROLL] = 1600,
            5_000 => rx.channels[channel::ROLL] = 1500,
            6_500 => rx.silent = true,
            _ => {}
        }

        if core.step().core_ran {
            let demands = core.demands();
            core.board_mut().attitude.apply(demands, dt);
        }
    }

    log::info!(
        "done: {} control cycles, {} missed deadlines, {} motor writes, {} forced disarms",
        core.scheduler().core_runs(),
        core.scheduler().missed_deadlines(),
        core.board().motors.writes,
        core.arming().forced_disarm_count()
    );
    Ok(())
}
