//! Public operation surface
//!
//! Validates parameters, builds the wire text and either enqueues it or
//! sends it and waits for the drone's reply. Nothing reaches the wire
//! without passing validation first.

pub mod command;
pub mod reply;

pub use command::{ArcBand, Command, Direction, FlipDirection, Point3, Query, Rotation, Rule};

use crate::config::CommanderConfig;
use crate::error::Result;
use crate::queue::CommandQueue;
use std::sync::Arc;

/// Drone command interface
pub struct Commander {
    queue: Arc<CommandQueue>,
    blocking: bool,
    arc_band: ArcBand,
}

impl Commander {
    pub fn new(queue: Arc<CommandQueue>, config: &CommanderConfig) -> Self {
        Self {
            queue,
            blocking: config.blocking,
            arc_band: ArcBand {
                min: config.arc_radius_min_cm,
                max: config.arc_radius_max_cm,
            },
        }
    }

    /// Enter SDK mode; always waits for the reply
    pub fn connect(&self) -> Result<()> {
        self.send_and_wait(&Command::sdk_mode())
    }

    /// Send through the queue and interpret the single reply
    pub fn send_and_wait(&self, command: &Command) -> Result<()> {
        let text = self.queue.request(command.clone())?;
        reply::interpret(&text)
    }

    /// Send through the queue and return the raw reply text
    pub fn query(&self, command: &Command) -> Result<String> {
        self.queue.request(command.clone())
    }

    fn dispatch(&self, command: Command) -> Result<()> {
        if self.blocking {
            self.send_and_wait(&command)
        } else {
            self.queue.enqueue(command)
        }
    }

    pub fn takeoff(&self) -> Result<()> {
        self.dispatch(Command::takeoff())
    }

    pub fn land(&self) -> Result<()> {
        self.dispatch(Command::land())
    }

    pub fn emergency(&self) -> Result<()> {
        self.dispatch(Command::emergency())
    }

    pub fn stream_on(&self) -> Result<()> {
        self.dispatch(Command::stream_on())
    }

    pub fn stream_off(&self) -> Result<()> {
        self.dispatch(Command::stream_off())
    }

    /// Relative move, 20–500 cm
    pub fn move_by(&self, direction: Direction, distance_cm: i32) -> Result<()> {
        self.dispatch(Command::move_by(direction, distance_cm)?)
    }

    pub fn up(&self, distance_cm: i32) -> Result<()> {
        self.move_by(Direction::Up, distance_cm)
    }

    pub fn down(&self, distance_cm: i32) -> Result<()> {
        self.move_by(Direction::Down, distance_cm)
    }

    pub fn left(&self, distance_cm: i32) -> Result<()> {
        self.move_by(Direction::Left, distance_cm)
    }

    pub fn right(&self, distance_cm: i32) -> Result<()> {
        self.move_by(Direction::Right, distance_cm)
    }

    pub fn forward(&self, distance_cm: i32) -> Result<()> {
        self.move_by(Direction::Forward, distance_cm)
    }

    pub fn backward(&self, distance_cm: i32) -> Result<()> {
        self.move_by(Direction::Backward, distance_cm)
    }

    /// Rotate 1–3600 degrees
    pub fn clockwise(&self, degrees: i32) -> Result<()> {
        self.dispatch(Command::rotate(Rotation::Clockwise, degrees)?)
    }

    pub fn counter_clockwise(&self, degrees: i32) -> Result<()> {
        self.dispatch(Command::rotate(Rotation::CounterClockwise, degrees)?)
    }

    pub fn flip(&self, direction: FlipDirection) -> Result<()> {
        self.dispatch(Command::flip(direction))
    }

    pub fn go(&self, x: i32, y: i32, z: i32, speed: i32) -> Result<()> {
        self.dispatch(Command::go(x, y, z, speed)?)
    }

    pub fn curve(&self, p1: Point3, p2: Point3, speed: i32) -> Result<()> {
        self.dispatch(Command::curve(p1, p2, speed, self.arc_band)?)
    }

    pub fn set_speed(&self, speed: i32) -> Result<()> {
        self.dispatch(Command::speed(speed)?)
    }

    /// Stick input; never acknowledged by the drone, so always enqueued
    pub fn set_rc_control(&self, a: i32, b: i32, c: i32, d: i32) -> Result<()> {
        self.queue.enqueue(Command::rc(a, b, c, d)?)
    }

    pub fn set_wifi_credentials(&self, ssid: &str, password: &str) -> Result<()> {
        self.dispatch(Command::wifi(ssid, password)?)
    }

    fn read(&self, query: Query) -> Result<String> {
        self.query(&Command::query(query))
    }

    /// Current speed setting (cm/s)
    pub fn get_speed(&self) -> Result<f64> {
        reply::parse_speed(&self.read(Query::Speed)?)
    }

    /// Battery percentage
    pub fn get_battery(&self) -> Result<u8> {
        reply::parse_battery(&self.read(Query::Battery)?)
    }

    /// Motor-on time (s)
    pub fn get_flight_time(&self) -> Result<u32> {
        reply::parse_time(&self.read(Query::Time)?)
    }

    /// Height (cm)
    pub fn get_height(&self) -> Result<i32> {
        reply::parse_height(&self.read(Query::Height)?)
    }

    /// (lowest, highest) board temperature (°C)
    pub fn get_temperature(&self) -> Result<(i32, i32)> {
        reply::parse_temperature(&self.read(Query::Temperature)?)
    }

    /// (pitch, roll, yaw) in degrees
    pub fn get_attitude(&self) -> Result<(i32, i32, i32)> {
        reply::parse_attitude(&self.read(Query::Attitude)?)
    }

    /// Barometer altitude (m)
    pub fn get_barometer(&self) -> Result<f64> {
        reply::parse_barometer(&self.read(Query::Barometer)?)
    }

    /// (agx, agy, agz)
    pub fn get_acceleration(&self) -> Result<(f64, f64, f64)> {
        reply::parse_acceleration(&self.read(Query::Acceleration)?)
    }

    /// Time-of-flight distance (cm)
    pub fn get_tof(&self) -> Result<i32> {
        reply::parse_tof(&self.read(Query::TimeOfFlight)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::config::QueueConfig;
    use crate::error::Error;
    use crate::transport::mock::MockLink;
    use std::time::Duration;

    fn commander(link: &MockLink, blocking: bool, interval_ms: u64) -> (Commander, Arc<CommandQueue>) {
        let queue_config = QueueConfig {
            rate_interval_ms: interval_ms,
            capacity: 8,
        };
        let queue = Arc::new(
            CommandQueue::start(Arc::new(link.clone()), &queue_config, &CancelToken::new()).unwrap(),
        );
        let config = CommanderConfig {
            blocking,
            ..CommanderConfig::default()
        };
        (Commander::new(Arc::clone(&queue), &config), queue)
    }

    #[test]
    fn test_invalid_parameters_leave_queue_untouched() {
        let link = MockLink::new();
        // Long interval: anything accepted would sit in the queue
        let (commander, queue) = commander(&link, false, 5_000);
        queue.enqueue(Command::sdk_mode()).unwrap();
        assert!(link.wait_for(Duration::from_secs(1), |sent| sent.len() == 1));

        let results = [
            commander.up(19),
            commander.backward(501),
            commander.clockwise(0),
            commander.counter_clockwise(3601),
            commander.go(10, 20, 20, 50),
            commander.curve(Point3::new(5, 5, 5), Point3::new(100, 0, 0), 30),
            commander.set_speed(5),
            commander.set_rc_control(101, 0, 0, 0),
            commander.set_wifi_credentials("", "pw"),
        ];
        for result in results {
            assert!(matches!(result, Err(Error::InvalidParameter(_))));
        }
        assert_eq!(queue.len(), 0);
        assert_eq!(link.sent().len(), 1);
        queue.stop();
    }

    #[test]
    fn test_blocking_reply_mapping() {
        let link = MockLink::new();
        let (commander, _queue) = commander(&link, true, 1);

        link.push_reply("ok");
        assert!(commander.takeoff().is_ok());
        link.push_reply("error");
        assert!(matches!(commander.forward(100), Err(Error::CommandRejected(_))));
        link.push_reply("ERROR");
        assert!(matches!(commander.land(), Err(Error::CommandRejected(_))));
        link.push_reply("unknown command");
        assert!(matches!(commander.flip(FlipDirection::Left), Err(Error::ProtocolViolation(_))));

        assert_eq!(link.sent(), vec!["takeoff", "forward 100", "land", "flip l"]);
    }

    #[test]
    fn test_non_blocking_enqueues() {
        let link = MockLink::new();
        let (commander, _queue) = commander(&link, false, 1);

        commander.takeoff().unwrap();
        commander.counter_clockwise(90).unwrap();
        commander.go(50, 60, 70, 20).unwrap();
        assert!(link.wait_for(Duration::from_secs(1), |sent| sent.len() == 3));
        assert_eq!(link.sent(), vec!["takeoff", "ccw 90", "go 50 60 70 20"]);
    }

    #[test]
    fn test_getters() {
        let link = MockLink::new();
        let (commander, _queue) = commander(&link, false, 1);

        link.push_reply("76");
        assert_eq!(commander.get_battery().unwrap(), 76);
        link.push_reply("83~86C");
        assert_eq!(commander.get_temperature().unwrap(), (83, 86));
        link.push_reply("pitch:1;roll:2;yaw:3;");
        assert_eq!(commander.get_attitude().unwrap(), (1, 2, 3));
        link.push_reply("not a number");
        assert!(matches!(commander.get_height(), Err(Error::ProtocolViolation(_))));

        assert_eq!(link.sent(), vec!["battery?", "temp?", "attitude?", "height?"]);
    }

    #[test]
    fn test_connect_waits_even_when_non_blocking() {
        let link = MockLink::new();
        let (commander, _queue) = commander(&link, false, 1);
        link.push_reply("error");
        assert!(matches!(commander.connect(), Err(Error::CommandRejected(_))));
        assert_eq!(link.sent(), vec!["command"]);
    }
}
